//! Integration tests for live sessions: cache priming, feed tailing,
//! relay signals, notifications, and the polling fallback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cleanops::config::Config;
use cleanops::db::departments::NewDepartment;
use cleanops::db::Database;
use cleanops::error::ErrorCode;
use cleanops::feed::FeedStatus;
use cleanops::notify::{LogDispatcher, NotificationDispatcher, PriorityNotice};
use cleanops::relay::{channel_name, Relay, Signal};
use cleanops::sync::ClientSession;
use cleanops::types::{Priority, WorkStatus};

/// Helper to create a fresh in-memory database for testing.
fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

struct Fixture {
    db: Database,
    company_id: String,
    employee_id: String,
    department_id: String,
}

/// One company with an employee and a department ready for assignment.
fn seed() -> Fixture {
    let db = setup_db();
    let company = db.create_company("Sparkle Ltd").unwrap();
    let employee = db.create_employee(&company.id, "Alice", "cleaner").unwrap();
    let department = db
        .create_department(NewDepartment {
            company_id: company.id.clone(),
            name: "Suite 101".to_string(),
            rooms: 2,
            beds: 3,
            ..NewDepartment::default()
        })
        .unwrap();

    Fixture {
        db,
        company_id: company.id,
        employee_id: employee.id,
        department_id: department.id,
    }
}

/// Config with short intervals so fallback paths run inside the test.
fn test_config() -> Config {
    let mut config = Config::default();
    config.feed.poll_interval_ms = 25;
    config.sync.refetch_interval_ms = 50;
    config
}

async fn connect(f: &Fixture, relay: Option<Arc<Relay>>) -> ClientSession {
    ClientSession::connect(
        f.db.clone(),
        &f.company_id,
        relay,
        Arc::new(LogDispatcher),
        &test_config(),
    )
    .await
    .expect("session should connect")
}

/// Poll a predicate until it holds or the deadline passes.
async fn wait_until<F>(mut check: F, what: &str)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Recorder standing in for a push gateway.
#[derive(Default)]
struct RecordingDispatcher {
    notices: Mutex<Vec<PriorityNotice>>,
}

impl RecordingDispatcher {
    fn sent(&self) -> Vec<PriorityNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, notice: PriorityNotice) -> anyhow::Result<()> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

mod session_tests {
    use super::*;

    #[tokio::test]
    async fn connect_primes_the_cache_from_a_snapshot() {
        let f = seed();
        let a = f
            .db
            .assign(&f.department_id, &f.employee_id, Priority::High)
            .unwrap();

        let session = connect(&f, None).await;

        let dept = session.department(&f.department_id).unwrap();
        assert_eq!(dept.assigned_to, Some(f.employee_id.clone()));
        assert_eq!(dept.priority, Priority::High);
        assert_eq!(session.task(&a.task.id).unwrap().status, WorkStatus::Pending);
        assert_eq!(session.tasks_for_employee(&f.employee_id).len(), 1);
        assert_eq!(session.applied_seq(), f.db.latest_seq().unwrap());

        session.shutdown();
    }

    #[tokio::test]
    async fn connect_unknown_company_is_rejected() {
        let f = seed();

        let err = ClientSession::connect(
            f.db.clone(),
            "ghost",
            None,
            Arc::new(LogDispatcher),
            &test_config(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), ErrorCode::CompanyNotFound);
    }

    #[tokio::test]
    async fn writes_land_in_the_local_cache_immediately() {
        let f = seed();
        let session = connect(&f, None).await;

        let a = session
            .assign(&f.department_id, &f.employee_id, Priority::Normal)
            .unwrap();

        // No waiting: the write path applies its own rows.
        let dept = session.department(&f.department_id).unwrap();
        assert_eq!(dept.status, WorkStatus::Pending);
        assert_eq!(dept.assigned_to, Some(f.employee_id.clone()));
        assert!(session.task(&a.task.id).is_some());
        assert_eq!(
            session.active_task_for_department(&f.department_id).unwrap().id,
            a.task.id
        );

        session.shutdown();
    }
}

mod feed_tests {
    use super::*;

    #[tokio::test]
    async fn feed_converges_a_second_session() {
        let f = seed();
        let writer = connect(&f, None).await;
        let reader = connect(&f, None).await;

        let a = writer
            .assign(&f.department_id, &f.employee_id, Priority::Normal)
            .unwrap();
        let seq = f.db.latest_seq().unwrap();

        reader.wait_for_seq(seq).await.unwrap();

        let dept = reader.department(&f.department_id).unwrap();
        assert_eq!(dept.status, WorkStatus::Pending);
        assert_eq!(dept.assigned_to, Some(f.employee_id.clone()));
        assert_eq!(reader.task(&a.task.id).unwrap().status, WorkStatus::Pending);

        writer.shutdown();
        reader.shutdown();
    }

    #[tokio::test]
    async fn completion_travels_the_feed() {
        let f = seed();
        let writer = connect(&f, None).await;
        let reader = connect(&f, None).await;

        let a = writer
            .assign(&f.department_id, &f.employee_id, Priority::Normal)
            .unwrap();
        writer
            .advance_status(&a.task.id, WorkStatus::InProgress)
            .unwrap();
        writer.toggle_priority(&f.department_id).unwrap();
        writer
            .advance_status(&a.task.id, WorkStatus::Completed)
            .unwrap();

        reader.wait_for_seq(f.db.latest_seq().unwrap()).await.unwrap();

        let dept = reader.department(&f.department_id).unwrap();
        assert_eq!(dept.status, WorkStatus::Completed);
        assert_eq!(dept.assigned_to, None);
        assert_eq!(dept.priority, Priority::Normal);
        assert!(dept.last_cleaned_at.is_some());

        let task = reader.task(&a.task.id).unwrap();
        assert_eq!(task.status, WorkStatus::Completed);
        assert_eq!(task.priority, Priority::High);
        assert!(task.completed_at.is_some());

        writer.shutdown();
        reader.shutdown();
    }

    #[tokio::test]
    async fn feed_reports_streaming_after_catch_up() {
        let f = seed();
        let writer = connect(&f, None).await;
        let reader = connect(&f, None).await;

        writer
            .assign(&f.department_id, &f.employee_id, Priority::Normal)
            .unwrap();
        let seq = f.db.latest_seq().unwrap();

        reader.wait_for_seq(seq).await.unwrap();

        assert_eq!(reader.feed_status(), FeedStatus::Streaming);
        assert!(reader.feed_cursor() >= seq);

        writer.shutdown();
        reader.shutdown();
    }
}

mod relay_tests {
    use super::*;

    #[tokio::test]
    async fn priority_toggle_propagates_between_sessions() {
        let f = seed();
        let relay = Arc::new(Relay::new(64));
        let writer = connect(&f, Some(Arc::clone(&relay))).await;
        let reader = connect(&f, Some(Arc::clone(&relay))).await;

        writer
            .assign(&f.department_id, &f.employee_id, Priority::Normal)
            .unwrap();
        writer.toggle_priority(&f.department_id).unwrap();

        wait_until(
            || {
                reader
                    .department(&f.department_id)
                    .is_some_and(|d| d.priority == Priority::High)
            },
            "reader to see the high priority",
        )
        .await;

        wait_until(
            || {
                reader
                    .active_task_for_department(&f.department_id)
                    .is_some_and(|t| t.priority == Priority::High)
            },
            "reader task to mirror the priority",
        )
        .await;

        writer.shutdown();
        reader.shutdown();
    }

    #[tokio::test]
    async fn signals_carry_the_writer_origin() {
        let f = seed();
        let relay = Arc::new(Relay::new(64));
        let writer = connect(&f, Some(Arc::clone(&relay))).await;
        let mut rx = relay.subscribe(&f.company_id);

        writer.toggle_priority(&f.department_id).unwrap();

        let envelope = rx.try_recv().expect("envelope should be queued");
        assert_eq!(envelope.origin, writer.origin());
        assert_eq!(envelope.channel, channel_name(&f.company_id));
        assert_eq!(envelope.signal.event_name(), "priority_changed");
        match envelope.signal {
            Signal::PriorityChanged {
                department_id,
                priority,
            } => {
                assert_eq!(department_id, f.department_id);
                assert_eq!(priority, Priority::High);
            }
            other => panic!("unexpected signal {other:?}"),
        }

        writer.shutdown();
    }

    #[tokio::test]
    async fn completion_signal_carries_the_priority_reset() {
        let f = seed();
        let relay = Arc::new(Relay::new(64));
        let writer = connect(&f, Some(Arc::clone(&relay))).await;

        let a = writer
            .assign(&f.department_id, &f.employee_id, Priority::Normal)
            .unwrap();
        writer.toggle_priority(&f.department_id).unwrap();

        let mut rx = relay.subscribe(&f.company_id);
        writer
            .advance_status(&a.task.id, WorkStatus::Completed)
            .unwrap();

        let envelope = rx.try_recv().expect("envelope should be queued");
        match envelope.signal {
            Signal::TaskStatusChanged {
                task_id,
                status,
                department_priority,
                ..
            } => {
                assert_eq!(task_id, a.task.id);
                assert_eq!(status, WorkStatus::Completed);
                assert_eq!(department_priority, Some(Priority::Normal));
            }
            other => panic!("unexpected signal {other:?}"),
        }

        writer.shutdown();
    }

    #[tokio::test]
    async fn assignment_signal_names_the_new_state() {
        let f = seed();
        let relay = Arc::new(Relay::new(64));
        let writer = connect(&f, Some(Arc::clone(&relay))).await;
        let mut rx = relay.subscribe(&f.company_id);

        let a = writer
            .assign(&f.department_id, &f.employee_id, Priority::High)
            .unwrap();

        let envelope = rx.try_recv().expect("envelope should be queued");
        match envelope.signal {
            Signal::TaskStatusChanged {
                task_id,
                department_id,
                status,
                department_priority,
            } => {
                assert_eq!(task_id, a.task.id);
                assert_eq!(department_id, f.department_id);
                assert_eq!(status, WorkStatus::Pending);
                assert_eq!(department_priority, Some(Priority::High));
            }
            other => panic!("unexpected signal {other:?}"),
        }

        writer.shutdown();
    }
}

mod fallback_tests {
    use super::*;

    #[tokio::test]
    async fn resync_pulls_latest_state_on_demand() {
        let f = seed();
        let reader = connect(&f, None).await;

        // Write behind the session's back.
        let a = f
            .db
            .assign(&f.department_id, &f.employee_id, Priority::High)
            .unwrap();

        let seq = reader.resync().unwrap();

        assert_eq!(seq, f.db.latest_seq().unwrap());
        assert_eq!(reader.task(&a.task.id).unwrap().priority, Priority::High);
        assert_eq!(
            reader.department(&f.department_id).unwrap().assigned_to,
            Some(f.employee_id.clone())
        );

        reader.shutdown();
    }

    #[tokio::test]
    async fn relayless_session_still_converges() {
        let f = seed();
        let relay = Arc::new(Relay::new(64));
        let writer = connect(&f, Some(relay)).await;
        let reader = connect(&f, None).await;

        writer
            .assign(&f.department_id, &f.employee_id, Priority::Normal)
            .unwrap();
        writer.toggle_priority(&f.department_id).unwrap();

        // No signals arrive; the feed and the refetch tick still do.
        wait_until(
            || {
                reader
                    .department(&f.department_id)
                    .is_some_and(|d| d.priority == Priority::High)
            },
            "relayless reader to converge",
        )
        .await;

        writer.shutdown();
        reader.shutdown();
    }
}

mod notification_tests {
    use super::*;

    async fn connect_recording(f: &Fixture) -> (ClientSession, Arc<RecordingDispatcher>) {
        let recorder = Arc::new(RecordingDispatcher::default());
        let session = ClientSession::connect(
            f.db.clone(),
            &f.company_id,
            None,
            Arc::clone(&recorder) as Arc<dyn NotificationDispatcher>,
            &test_config(),
        )
        .await
        .expect("session should connect");
        (session, recorder)
    }

    #[tokio::test]
    async fn toggle_notifies_the_current_assignee() {
        let f = seed();
        let (session, recorder) = connect_recording(&f).await;

        session
            .assign(&f.department_id, &f.employee_id, Priority::Normal)
            .unwrap();
        session.toggle_priority(&f.department_id).unwrap();

        wait_until(|| recorder.sent().len() == 1, "notice to be dispatched").await;

        let notice = recorder.sent().remove(0);
        assert_eq!(notice.user_id, f.employee_id);
        assert_eq!(notice.related_department_id, f.department_id);
        assert!(notice.message.contains("high"));

        session.shutdown();
    }

    #[tokio::test]
    async fn unassigned_toggle_sends_nothing() {
        let f = seed();
        let (session, recorder) = connect_recording(&f).await;

        session.toggle_priority(&f.department_id).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(recorder.sent().is_empty());

        session.shutdown();
    }

    #[tokio::test]
    async fn completion_does_not_notify() {
        let f = seed();
        let (session, recorder) = connect_recording(&f).await;

        let a = session
            .assign(&f.department_id, &f.employee_id, Priority::Normal)
            .unwrap();
        session
            .advance_status(&a.task.id, WorkStatus::Completed)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(recorder.sent().is_empty());

        session.shutdown();
    }
}
