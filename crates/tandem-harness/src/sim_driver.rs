//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` provides the same seams as the production driver but backed
//! by the in-memory relay, its history store and a recording media backend.
//! It implements [`Driver`] so the same [`tandem_app::Runtime`]
//! orchestration code runs in both production and simulation.

use tandem_app::Driver;

use crate::{FakeMedia, SimEnv, SimHistory, SimRelay};

/// Simulation driver for deterministic testing.
#[derive(Debug, Clone)]
pub struct SimDriver {
    env: SimEnv,
    relay: SimRelay,
    history: SimHistory,
    media: FakeMedia,
}

impl SimDriver {
    /// Driver for one client of `relay`, with its own media backend.
    pub fn new(env: SimEnv, relay: SimRelay, media: FakeMedia) -> Self {
        let history = relay.history();
        Self { env, relay, history, media }
    }
}

impl Driver for SimDriver {
    type Env = SimEnv;
    type Connector = SimRelay;
    type History = SimHistory;
    type Media = FakeMedia;

    fn env(&self) -> &SimEnv {
        &self.env
    }

    fn connector(&self) -> &SimRelay {
        &self.relay
    }

    fn history(&self) -> &SimHistory {
        &self.history
    }

    fn media(&self) -> &FakeMedia {
        &self.media
    }
}

#[cfg(test)]
mod tests {
    use tandem_app::{AppConfig, Runtime};
    use tandem_core::ConnectionStatus;
    use tandem_proto::UserId;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn runtime_connects_through_the_sim_relay() {
        let env = SimEnv::new();
        let relay = SimRelay::new(env.clone());
        let driver = SimDriver::new(env, relay.clone(), FakeMedia::new());
        let (runtime, handle) = Runtime::new(driver, AppConfig::default());
        let task = tokio::spawn(runtime.run());

        let user = UserId::new(5).unwrap();
        handle.connect(user).unwrap();
        let snapshot = handle.wait_for(|s| s.connection == ConnectionStatus::Connected).await.unwrap();

        assert_eq!(snapshot.user, Some(user));
        assert_eq!(relay.session_count(user), 1);

        handle.quit().unwrap();
        task.await.unwrap();
    }
}
