use futures::FutureExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use crate::error::ConduitError;
use crate::session::{Session, Timer};
use crate::transport::{Transport, TransportEvent};

/// Feeds a session from its transport's event channel and a tokio clock.
///
/// Must be used inside a tokio runtime with the time driver enabled.
pub struct SessionDriver {
    events: UnboundedReceiver<TransportEvent>,
    events_closed: bool,
    timers: FuturesUnordered<BoxFuture<'static, Timer>>,
}

impl SessionDriver {
    pub fn new(events: UnboundedReceiver<TransportEvent>) -> Self {
        SessionDriver {
            events,
            events_closed: false,
            timers: FuturesUnordered::new(),
        }
    }

    fn arm<T: Transport>(&mut self, session: &mut Session<T>) {
        for (delay, timer) in session.take_timers() {
            let sleep = tokio::time::sleep(delay);
            self.timers.push(async move {
                sleep.await;
                timer
            }
            .boxed());
        }
    }

    /// Waits for the next event or timer and hands it to the session.
    ///
    /// Returns `Ok(false)` once the event channel is closed and no timer is
    /// left.
    pub async fn turn<T: Transport>(&mut self, session: &mut Session<T>) -> Result<bool, ConduitError> {
        self.arm(session);
        if self.events_closed && self.timers.is_empty() {
            return Ok(false);
        }

        tokio::select! {
            biased;
            event = self.events.recv(), if !self.events_closed => match event {
                Some(event) => session.handle(event)?,
                None => self.events_closed = true,
            },
            Some(timer) = self.timers.next(), if !self.timers.is_empty() => session.on_timer(timer)?,
        }
        self.arm(session);
        Ok(true)
    }

    /// Handles every event and timer that is ready without waiting.
    /// Returns how many were handled.
    pub fn pump<T: Transport>(&mut self, session: &mut Session<T>) -> Result<usize, ConduitError> {
        let mut handled = 0;
        loop {
            self.arm(session);
            match self.events.try_recv() {
                Ok(event) => {
                    session.handle(event)?;
                    handled += 1;
                    continue;
                }
                Err(TryRecvError::Disconnected) => self.events_closed = true,
                Err(TryRecvError::Empty) => {}
            }
            match self.timers.next().now_or_never() {
                Some(Some(timer)) => {
                    session.on_timer(timer)?;
                    handled += 1;
                }
                _ => return Ok(handled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SessionConfig;
    use crate::memory::MemoryRelay;
    use crate::netid::{IsolationToken, NetId};
    use crate::session::NetworkStatus;

    #[tokio::test(start_paused = true)]
    async fn reconnects_on_the_tokio_clock() {
        let relay = MemoryRelay::new();
        let (transport, events) = relay.endpoint();
        let endpoint = transport.id();
        let mut session = Session::new(SessionConfig::default(), transport, IsolationToken::new("driver"));
        let mut driver = SessionDriver::new(events);

        session.init(Some(NetId::node("solo"))).unwrap();
        driver.pump(&mut session).unwrap();
        assert_eq!(session.status(), NetworkStatus::Online);

        relay.set_reachable(endpoint, false);
        driver.pump(&mut session).unwrap();
        assert_eq!(session.status(), NetworkStatus::Offline);

        // Failed reconnect attempts keep the session offline.
        tokio::time::sleep(Duration::from_millis(600)).await;
        driver.pump(&mut session).unwrap();
        assert_eq!(session.status(), NetworkStatus::Offline);

        relay.set_reachable(endpoint, true);
        while session.status() != NetworkStatus::Online {
            assert!(driver.turn(&mut session).await.unwrap());
        }
    }
}
