use std::{sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset};
use tokio::{
    sync::watch,
    task::JoinSet,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

use crate::{
    error::CheckError,
    ports::Clock,
    room::{Decision, RoomController},
};

/// Result of one room's check within a cycle.
#[derive(Debug)]
pub struct RoomOutcome {
    pub room: String,
    pub result: Result<Decision, CheckError>,
}

/// Drives every room on a fixed cadence. Cycles never overlap: the next tick
/// is not taken until every room of the current one has reported.
pub struct Poller {
    rooms: Vec<Arc<RoomController>>,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(rooms: Vec<RoomController>, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: rooms.into_iter().map(Arc::new).collect(),
            interval,
            clock,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Ticks until `shutdown` flips to `true` or its sender goes away. A cycle
    /// that has already started always runs to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "polling {} rooms every {}s",
            self.rooms.len(),
            self.interval.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let outcomes = self.poll_once(self.clock.now()).await;
                    log_outcomes(&outcomes);
                }
            }
        }

        info!("poller stopped");
    }

    /// Checks every room concurrently and waits for all of them. Outcomes are
    /// returned in room order, one per room.
    pub async fn poll_once(&self, now: DateTime<FixedOffset>) -> Vec<RoomOutcome> {
        let mut tasks = JoinSet::new();
        for (index, room) in self.rooms.iter().enumerate() {
            let room = Arc::clone(room);
            tasks.spawn(async move { (index, room.check(now).await) });
        }

        let mut slots: Vec<Option<Result<Decision, CheckError>>> =
            self.rooms.iter().map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                // The failed room's slot stays empty and is filled below.
                Err(err) => error!("room check task failed: {err}"),
            }
        }

        self.rooms
            .iter()
            .zip(slots)
            .map(|(room, slot)| RoomOutcome {
                room: room.name().to_string(),
                result: slot.unwrap_or_else(|| {
                    Err(CheckError::Aborted("room check task did not complete".to_string()))
                }),
            })
            .collect()
    }
}

/// Logs one error per failed room and returns how many failed.
fn log_outcomes(outcomes: &[RoomOutcome]) -> usize {
    let mut failed = 0;
    for outcome in outcomes {
        if let Err(err) = &outcome.result {
            failed += 1;
            error!("checking {}: {err}", outcome.room);
        }
    }
    debug!("cycle complete: {} rooms, {failed} failed", outcomes.len());
    failed
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        error::TelemetryError,
        ports::TelemetryStore,
        room::OccupancyPolicy,
        testing::{fixed_time, room, FakePlug, FakeStore, FixedClock},
        types::{HeatingState, User},
    };

    const ALICE_MAC: &str = "aa:bb:cc:dd:ee:01";
    const BOB_MAC: &str = "aa:bb:cc:dd:ee:02";

    async fn init(
        name: &str,
        user: User,
        plug: FakePlug,
        store: Arc<dyn TelemetryStore>,
    ) -> RoomController {
        RoomController::initialize(
            room(name, vec![user]),
            Box::new(plug),
            store,
            OccupancyPolicy::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn one_failing_room_does_not_stop_the_other() {
        let store = Arc::new(
            FakeStore::new()
                .with_failing_presence(ALICE_MAC)
                .with_present(BOB_MAC)
                .with_temperature("Office", 17.5)
                .with_temperature("Bedroom", 17.5),
        );
        let office_plug = FakePlug::new("office.plug.local");
        let office_commands = office_plug.commands();
        let bedroom_plug = FakePlug::new("bedroom.plug.local");
        let bedroom_commands = bedroom_plug.commands();

        let rooms = vec![
            init("Office", User::new("alice", ALICE_MAC), office_plug, store.clone()).await,
            init("Bedroom", User::new("bob", BOB_MAC), bedroom_plug, store.clone()).await,
        ];
        let poller = Poller::new(
            rooms,
            Duration::from_secs(30),
            Arc::new(FixedClock(fixed_time(10, 0))),
        );

        let outcomes = poller.poll_once(fixed_time(10, 0)).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].room, "Office");
        assert!(matches!(outcomes[0].result, Err(CheckError::Presence(_))));
        assert_eq!(outcomes[1].room, "Bedroom");
        assert_eq!(
            outcomes[1].result.as_ref().unwrap().state,
            HeatingState::Heating
        );

        assert_eq!(log_outcomes(&outcomes), 1);

        assert!(office_commands.lock().unwrap().is_empty());
        assert_eq!(*bedroom_commands.lock().unwrap(), vec![HeatingState::Heating]);
        assert_eq!(
            store.records(),
            vec![("Bedroom".to_string(), HeatingState::Heating)]
        );
    }

    #[tokio::test]
    async fn failures_do_not_carry_into_the_next_cycle() {
        let store = Arc::new(FakeStore::new().with_present(ALICE_MAC));
        let plug = FakePlug::new("office.plug.local");
        let commands = plug.commands();
        let poller = Poller::new(
            vec![init("Office", User::new("alice", ALICE_MAC), plug, store).await],
            Duration::from_secs(30),
            Arc::new(FixedClock(fixed_time(10, 0))),
        );

        let first = poller.poll_once(fixed_time(10, 0)).await;
        assert!(first[0].result.is_err());

        // Outside the window no lookup is needed, so the same room succeeds.
        let second = poller.poll_once(fixed_time(23, 0)).await;
        assert_eq!(
            second[0].result.as_ref().unwrap().state,
            HeatingState::Idle
        );
        assert_eq!(*commands.lock().unwrap(), vec![HeatingState::Idle]);
    }

    struct PanickingStore;

    #[async_trait]
    impl TelemetryStore for PanickingStore {
        async fn any_user_present(&self, _users: &[User]) -> Result<bool, TelemetryError> {
            panic!("store exploded");
        }

        async fn current_temperature(&self, _room: &str) -> Result<f64, TelemetryError> {
            Ok(15.0)
        }

        async fn record_heating_state(
            &self,
            _room: &str,
            _state: HeatingState,
        ) -> Result<(), TelemetryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicking_room_is_reported_as_aborted() {
        let healthy = Arc::new(
            FakeStore::new()
                .with_present(BOB_MAC)
                .with_temperature("Bedroom", 15.0),
        );
        let rooms = vec![
            init(
                "Office",
                User::new("alice", ALICE_MAC),
                FakePlug::new("office.plug.local"),
                Arc::new(PanickingStore),
            )
            .await,
            init(
                "Bedroom",
                User::new("bob", BOB_MAC),
                FakePlug::new("bedroom.plug.local"),
                healthy,
            )
            .await,
        ];
        let poller = Poller::new(
            rooms,
            Duration::from_secs(30),
            Arc::new(FixedClock(fixed_time(10, 0))),
        );

        let outcomes = poller.poll_once(fixed_time(10, 0)).await;

        assert!(matches!(outcomes[0].result, Err(CheckError::Aborted(_))));
        assert!(outcomes[1].result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_shutdown() {
        let store = Arc::new(FakeStore::new());
        let plug = FakePlug::new("office.plug.local");
        let commands = plug.commands();
        let poller = Arc::new(Poller::new(
            vec![init("Office", User::new("alice", ALICE_MAC), plug, store).await],
            Duration::from_secs(30),
            Arc::new(FixedClock(fixed_time(23, 0))),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.run(shutdown_rx).await }
        });

        // Ticks fire at 0s, 30s and 60s.
        tokio::time::sleep(Duration::from_secs(65)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(commands.lock().unwrap().len(), 3);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(commands.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_when_shutdown_sender_is_dropped() {
        let poller = Poller::new(
            Vec::new(),
            Duration::from_secs(30),
            Arc::new(FixedClock(fixed_time(10, 0))),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        poller.run(shutdown_rx).await;
        assert_eq!(poller.room_count(), 0);
    }
}
