//! Resilient duplex transport: one WebSocket link to the server carrying
//! JSON text frames, type-routed inbound handlers, reconnect with backoff
//! and a throttled send path for high-frequency messages.

use futures::{SinkExt, StreamExt};
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, info, trace, warn};
use shared::{ClientMessage, MessageKind, ServerMessage};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::Message;

pub const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
pub const BACKOFF_CEILING: Duration = Duration::from_secs(10);
pub const MOVE_SEND_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("link closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8080`.
    pub url: String,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
    pub move_send_interval: Duration,
    /// Simulated round-trip latency, half applied in each direction.
    pub fake_ping: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            backoff_floor: BACKOFF_FLOOR,
            backoff_ceiling: BACKOFF_CEILING,
            move_send_interval: MOVE_SEND_INTERVAL,
            fake_ping: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

/// Exponential reconnect delay. Doubles per failure, capped, reset on open.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let floor = floor.min(ceiling);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

type GcraLimiter<C> =
    RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Drop-not-queue rate limiter: one message per interval, no burst.
pub struct Throttle<C: Clock = DefaultClock> {
    limiter: GcraLimiter<C>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, &DefaultClock::default())
    }
}

impl<C: Clock> Throttle<C> {
    pub fn with_clock(min_interval: Duration, clock: &C) -> Self {
        // A zero interval means unthrottled.
        let quota = Quota::with_period(min_interval)
            .map(|quota| quota.allow_burst(NonZeroU32::MIN))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX));
        Self {
            limiter: RateLimiter::direct_with_clock(quota, clock),
        }
    }

    pub fn permit(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Events reported by the link task back to the owning [`Transport`].
#[derive(Debug)]
pub enum LinkEvent {
    Dialing,
    Opened,
    Frame(String),
    Closed,
}

type Handler = Box<dyn FnMut(&ServerMessage)>;

/// Type-routed message bus over a single reconnecting link.
///
/// All state lives on the thread that drives [`Transport::pump`]; the tokio
/// runtime only owns the socket I/O and the reconnect timer.
pub struct Transport {
    config: TransportConfig,
    runtime: Handle,
    state: LinkState,
    /// Delay of the reconnect that is sleeping, if any.
    reconnect_delay: Option<Duration>,
    retry_count: u32,
    backoff: Backoff,
    throttle: Throttle,
    handlers: HashMap<MessageKind, Vec<Handler>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    opened_count: u64,
}

impl Transport {
    pub fn new(config: TransportConfig, runtime: Handle) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backoff: Backoff::new(config.backoff_floor, config.backoff_ceiling),
            throttle: Throttle::new(config.move_send_interval),
            config,
            runtime,
            state: LinkState::Closed,
            reconnect_delay: None,
            retry_count: 0,
            handlers: HashMap::new(),
            outbound: None,
            events_tx,
            events_rx,
            opened_count: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Number of times a link has successfully opened.
    pub fn opened_count(&self) -> u64 {
        self.opened_count
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.reconnect_delay
    }

    /// Reconnects scheduled since the link was last open.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Starts a new physical link unless one is already connecting or open.
    pub fn connect(&mut self) {
        if self.state != LinkState::Closed || self.reconnect_delay.is_some() {
            return;
        }
        self.state = LinkState::Connecting;
        self.spawn_link(Duration::ZERO);
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_delay.is_some() {
            return;
        }
        let delay = self.backoff.next_delay();
        self.retry_count += 1;
        info!("Reconnecting in {:?} (attempt {})", delay, self.retry_count);
        self.reconnect_delay = Some(delay);
        self.spawn_link(delay);
    }

    fn spawn_link(&mut self, delay: Duration) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.outbound = Some(out_tx);
        let events = self.events_tx.clone();
        let url = self.config.url.clone();
        let fake_ping = self.config.fake_ping;
        self.runtime.spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let _ = events.send(LinkEvent::Dialing);
            if let Err(e) = run_link(&url, fake_ping, &events, out_rx).await {
                warn!("Link to {} failed: {}", url, e);
            }
            let _ = events.send(LinkEvent::Closed);
        });
    }

    /// Registers a handler for one message type. Handlers run in
    /// registration order.
    pub fn on<F>(&mut self, kind: MessageKind, handler: F)
    where
        F: FnMut(&ServerMessage) + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Best-effort send. Returns whether the message was handed to an open link.
    pub fn send(&mut self, message: &ClientMessage) -> bool {
        if self.state != LinkState::Open {
            return false;
        }
        let Some(outbound) = &self.outbound else {
            return false;
        };
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                debug!("Dropping unencodable message: {}", NetError::from(e));
                return false;
            }
        };
        outbound.send(text).is_ok()
    }

    /// Like [`Transport::send`], but drops calls arriving within the
    /// minimum send interval of the previous accepted one.
    pub fn send_throttled(&mut self, message: &ClientMessage) -> bool {
        if !self.throttle.permit() {
            trace!("Throttled {:?}", message);
            return false;
        }
        self.send(message)
    }

    /// Drains link events, updates link state, and routes decoded messages
    /// to handlers. The decoded messages are also returned to the caller.
    pub fn pump(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();

        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                LinkEvent::Dialing => {
                    self.reconnect_delay = None;
                    self.state = LinkState::Connecting;
                }
                LinkEvent::Opened => {
                    info!("Connected to {}", self.config.url);
                    self.state = LinkState::Open;
                    self.backoff.reset();
                    self.retry_count = 0;
                    self.opened_count += 1;
                }
                LinkEvent::Frame(text) => match ServerMessage::decode(&text) {
                    Some(message) => {
                        self.dispatch(&message);
                        messages.push(message);
                    }
                    None => debug!("Dropping malformed frame ({} bytes)", text.len()),
                },
                LinkEvent::Closed => {
                    if self.state == LinkState::Open {
                        info!("Connection to {} closed", self.config.url);
                    }
                    self.state = LinkState::Closed;
                    self.outbound = None;
                    self.reconnect_delay = None;
                    self.schedule_reconnect();
                }
            }
        }

        messages
    }

    fn dispatch(&mut self, message: &ServerMessage) {
        if let Some(handlers) = self.handlers.get_mut(&message.kind()) {
            for handler in handlers.iter_mut() {
                handler(message);
            }
        }
    }
}

/// Frames held back by simulated latency. Every frame carries its own
/// release time, so deadlines are non-decreasing front to back.
struct DelayLine<T> {
    delay: Duration,
    queue: VecDeque<(Instant, T)>,
}

impl<T> DelayLine<T> {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            queue: VecDeque::new(),
        }
    }

    fn push(&mut self, item: T) {
        self.queue.push_back((Instant::now() + self.delay, item));
    }

    fn deadline(&self) -> Option<Instant> {
        self.queue.front().map(|(at, _)| *at)
    }

    fn pop_due(&mut self, now: Instant) -> Option<T> {
        match self.queue.front() {
            Some((at, _)) if *at <= now => self.queue.pop_front().map(|(_, item)| item),
            _ => None,
        }
    }
}

/// Owns one physical connection until either side closes it.
async fn run_link(
    url: &str,
    fake_ping: Duration,
    events: &mpsc::UnboundedSender<LinkEvent>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> Result<(), NetError> {
    let (socket, _) = connect_async_with_config(url, None, true).await?;
    events.send(LinkEvent::Opened).map_err(|_| NetError::Closed)?;

    let (mut sink, mut stream) = socket.split();
    let one_way = fake_ping / 2;
    let mut inbound = DelayLine::new(one_way);
    let mut outgoing = DelayLine::new(one_way);

    loop {
        let deadline = match (inbound.deadline(), outgoing.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => inbound.push(text),
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(other)) => debug!("Dropping non-text frame ({} bytes)", other.len()),
                Some(Err(e)) => return Err(e.into()),
            },
            text = outbound.recv() => match text {
                Some(text) => outgoing.push(text),
                None => return Ok(()),
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
        }

        let now = Instant::now();
        while let Some(text) = inbound.pop_due(now) {
            events.send(LinkEvent::Frame(text)).map_err(|_| NetError::Closed)?;
        }
        while let Some(text) = outgoing.pop_due(now) {
            sink.send(Message::Text(text)).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use governor::clock::FakeRelativeClock;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn unreachable_config() -> TransportConfig {
        TransportConfig {
            // Port 9 on loopback is closed in test environments.
            url: "ws://127.0.0.1:9".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
    }

    #[test]
    fn test_backoff_reset_restores_floor() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(10));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_throttle_drops_within_interval() {
        let clock = FakeRelativeClock::default();
        let throttle = Throttle::with_clock(Duration::from_millis(16), &clock);
        assert!(throttle.permit());
        assert!(!throttle.permit());

        clock.advance(Duration::from_millis(5));
        assert!(!throttle.permit());
        clock.advance(Duration::from_millis(10));
        assert!(!throttle.permit());
        clock.advance(Duration::from_millis(2));
        assert!(throttle.permit());
        clock.advance(Duration::from_millis(3));
        assert!(!throttle.permit());
        clock.advance(Duration::from_millis(20));
        assert!(throttle.permit());
    }

    #[test]
    fn test_zero_interval_is_unthrottled() {
        let throttle = Throttle::new(Duration::ZERO);
        assert!((0..100).all(|_| throttle.permit()));
    }

    #[tokio::test]
    async fn test_send_is_noop_while_closed() {
        let mut transport = Transport::new(unreachable_config(), Handle::current());
        assert_eq!(transport.state(), LinkState::Closed);
        assert!(!transport.send(&ClientMessage::Attack));
        assert!(!transport.send_throttled(&ClientMessage::Jump));
    }

    #[tokio::test]
    async fn test_connect_is_single_link() {
        let mut transport = Transport::new(unreachable_config(), Handle::current());
        transport.connect();
        assert_eq!(transport.state(), LinkState::Connecting);
        transport.connect();
        assert_eq!(transport.state(), LinkState::Connecting);
        assert!(!transport.send(&ClientMessage::Attack));
    }

    #[tokio::test]
    async fn test_failed_connect_schedules_reconnect_at_floor() {
        let mut transport = Transport::new(unreachable_config(), Handle::current());
        transport.connect();

        // Wait for the refused connection to report closure.
        for _ in 0..100 {
            transport.pump();
            if transport.state() == LinkState::Closed {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(transport.state(), LinkState::Closed);
        assert_eq!(transport.reconnect_delay(), Some(BACKOFF_FLOOR));
        assert_eq!(transport.retry_count(), 1);
        assert_eq!(transport.backoff().current(), BACKOFF_FLOOR * 2);
        assert_eq!(transport.opened_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_floor_keeps_retrying() {
        let config = TransportConfig {
            backoff_floor: Duration::ZERO,
            ..unreachable_config()
        };
        let mut transport = Transport::new(config, Handle::current());
        transport.connect();

        for _ in 0..200 {
            transport.pump();
            if transport.retry_count() >= 5 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        assert!(transport.retry_count() >= 5);
        assert_eq!(transport.backoff().current(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_dispatch_runs_handlers_in_registration_order() {
        let mut transport = Transport::new(unreachable_config(), Handle::current());
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Rc::clone(&seen);
            transport.on(MessageKind::PlayerLeft, move |_| seen.borrow_mut().push(tag));
        }
        let other = Rc::clone(&seen);
        transport.on(MessageKind::Kill, move |_| other.borrow_mut().push("kill"));

        transport
            .events_tx
            .send(LinkEvent::Frame(r#"{"type":"playerLeft","id":"x"}"#.into()))
            .unwrap();
        transport
            .events_tx
            .send(LinkEvent::Frame("{garbage".into()))
            .unwrap();

        let messages = transport.pump();
        assert_eq!(messages.len(), 1);
        assert_eq!(*seen.borrow(), vec!["first", "second"]);
    }

    proptest! {
        #[test]
        fn prop_throttle_bounds_transmissions(
            offsets in proptest::collection::vec(0u64..200, 1..200),
        ) {
            let clock = FakeRelativeClock::default();
            let throttle = Throttle::with_clock(Duration::from_millis(16), &clock);
            let mut sorted = offsets.clone();
            sorted.sort_unstable();
            let window = *sorted.last().unwrap() + 1;

            let mut elapsed = 0;
            let mut sent = 0u64;
            for offset in sorted {
                clock.advance(Duration::from_millis(offset - elapsed));
                elapsed = offset;
                if throttle.permit() {
                    sent += 1;
                }
            }

            let bound = (window + 15) / 16;
            prop_assert!(sent <= bound, "sent {} > bound {}", sent, bound);
        }

        #[test]
        fn prop_backoff_monotonic_and_capped(
            floor_ms in 1u64..2000,
            ceiling_ms in 1u64..20000,
            steps in 1usize..40,
        ) {
            let ceiling = Duration::from_millis(ceiling_ms);
            let mut backoff = Backoff::new(Duration::from_millis(floor_ms), ceiling);
            let mut previous = Duration::ZERO;
            for _ in 0..steps {
                let delay = backoff.next_delay();
                prop_assert!(delay >= previous);
                prop_assert!(delay <= ceiling);
                previous = delay;
            }
        }
    }
}
