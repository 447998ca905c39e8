use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use parley_coordinator::{
    ContentItem, FeedbackRequest, FeedbackService, PresentationSession, PresentationSurface,
    ReplyStatus, RequestCoordinator, SessionEvents, SessionRequest, TaskId, TaskStatus,
};
use parley_options::{FeedbackConfig, OptionResolver};
use parley_rules::RuleEngine;

#[derive(Clone, Copy)]
enum ScriptedAction {
    Reply(Duration),
    Close(Duration),
    Ignore,
}

#[derive(Default)]
struct SurfaceJournal {
    shown: Vec<SessionRequest>,
    closed: Vec<String>,
}

struct ScriptedSurface {
    actions: HashMap<String, ScriptedAction>,
    journal: Arc<Mutex<SurfaceJournal>>,
}

struct ScriptedSession {
    task_id: String,
    journal: Arc<Mutex<SurfaceJournal>>,
}

impl PresentationSession for ScriptedSession {
    fn close(&mut self) {
        self.journal
            .lock()
            .expect("journal lock")
            .closed
            .push(self.task_id.clone());
    }
}

impl PresentationSurface for ScriptedSurface {
    fn create(
        &mut self,
        request: SessionRequest,
        events: SessionEvents,
    ) -> anyhow::Result<Box<dyn PresentationSession>> {
        let action = self
            .actions
            .get(&request.prompt)
            .copied()
            .unwrap_or(ScriptedAction::Ignore);
        let task_id = request.task_id.to_string();
        let reply_text = format!("reply to {}", request.prompt);
        self.journal.lock().expect("journal lock").shown.push(request);
        match action {
            ScriptedAction::Reply(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    events.feedback_provided(vec![ContentItem::text(reply_text)]);
                });
            }
            ScriptedAction::Close(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    events.closed();
                });
            }
            ScriptedAction::Ignore => {}
        }
        Ok(Box::new(ScriptedSession {
            task_id,
            journal: Arc::clone(&self.journal),
        }))
    }
}

fn service_with_script(
    actions: &[(&str, ScriptedAction)],
) -> (Arc<FeedbackService>, Arc<Mutex<SurfaceJournal>>) {
    let journal = Arc::new(Mutex::new(SurfaceJournal::default()));
    let surface = ScriptedSurface {
        actions: actions
            .iter()
            .map(|(prompt, action)| (prompt.to_string(), *action))
            .collect(),
        journal: Arc::clone(&journal),
    };
    let coordinator = Arc::new(RequestCoordinator::start(surface).expect("start coordinator"));
    let service = Arc::new(FeedbackService::new(
        coordinator,
        Arc::new(OptionResolver::with_rule_engine(Arc::new(RuleEngine::builtin()))),
        Arc::new(FeedbackConfig::default()),
    ));
    (service, journal)
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn integration_concurrent_requests_resolve_independently() {
    let (service, journal) = service_with_script(&[
        ("first", ScriptedAction::Reply(Duration::from_millis(100))),
        ("second", ScriptedAction::Reply(Duration::from_millis(300))),
        ("third", ScriptedAction::Close(Duration::from_millis(50))),
    ]);

    let started = Instant::now();
    let callers = ["first", "second", "third"]
        .into_iter()
        .map(|prompt| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let reply = service
                    .request_feedback(
                        FeedbackRequest::new(prompt).with_timeout(Duration::from_secs(5)),
                    )
                    .expect("request feedback");
                (prompt, reply, started.elapsed())
            })
        })
        .collect::<Vec<_>>();
    let replies = callers
        .into_iter()
        .map(|caller| caller.join().expect("caller thread"))
        .map(|(prompt, reply, elapsed)| (prompt, (reply, elapsed)))
        .collect::<HashMap<_, _>>();

    let (first, first_elapsed) = &replies["first"];
    let (second, second_elapsed) = &replies["second"];
    let (third, third_elapsed) = &replies["third"];

    assert_eq!(first.status, ReplyStatus::Completed);
    assert_eq!(
        first.result.content,
        vec![ContentItem::text("reply to first")]
    );
    assert_eq!(second.status, ReplyStatus::Completed);
    assert_eq!(
        second.result.content,
        vec![ContentItem::text("reply to second")]
    );
    assert_eq!(third.status, ReplyStatus::Cancelled);
    assert!(third.result.is_empty());

    for (reply, _) in replies.values() {
        assert_eq!(reply.result.task_id, reply.task_id);
    }
    assert_ne!(first.task_id, second.task_id);
    assert_ne!(first.task_id, third.task_id);
    assert_ne!(second.task_id, third.task_id);

    assert!(third_elapsed < first_elapsed);
    assert!(first_elapsed < second_elapsed);
    assert!(*first_elapsed < Duration::from_millis(300));

    let coordinator = service.coordinator();
    assert_eq!(coordinator.task_status(&first.task_id), Some(TaskStatus::Completed));
    assert_eq!(coordinator.task_status(&third.task_id), Some(TaskStatus::Cancelled));
    assert!(wait_until(Duration::from_secs(1), || {
        coordinator.active_session_count() == 0
    }));
    assert_eq!(coordinator.bridge().open_count(), 0);
    assert_eq!(journal.lock().expect("journal lock").shown.len(), 3);
}

#[test]
fn integration_timed_out_request_discards_session_and_late_reply() {
    let (service, journal) = service_with_script(&[
        ("silent", ScriptedAction::Ignore),
        ("slow", ScriptedAction::Reply(Duration::from_millis(200))),
    ]);

    let silent = service
        .request_feedback(FeedbackRequest::new("silent").with_timeout(Duration::from_millis(80)))
        .expect("silent request");
    assert_eq!(silent.status, ReplyStatus::TimedOut);
    assert!(silent.result.is_empty());

    let slow = service
        .request_feedback(FeedbackRequest::new("slow").with_timeout(Duration::from_millis(50)))
        .expect("slow request");
    assert_eq!(slow.status, ReplyStatus::TimedOut);

    let coordinator = service.coordinator();
    assert!(wait_until(Duration::from_secs(1), || {
        coordinator.task_status(&slow.task_id) == Some(TaskStatus::TimedOut)
            && coordinator.active_session_count() == 0
    }));
    // The late reply arrives after expiry and must not change the outcome.
    thread::sleep(Duration::from_millis(250));
    assert_eq!(coordinator.task_status(&slow.task_id), Some(TaskStatus::TimedOut));
    assert_eq!(
        coordinator.task_status(&silent.task_id),
        Some(TaskStatus::TimedOut)
    );

    let journal = journal.lock().expect("journal lock");
    assert!(journal.closed.contains(&silent.task_id.to_string()));
    assert!(journal.closed.contains(&slow.task_id.to_string()));
}

#[test]
fn integration_back_to_back_requests_can_reuse_one_task_id() {
    let (service, journal) = service_with_script(&[(
        "again",
        ScriptedAction::Reply(Duration::from_millis(0)),
    )]);
    let task_id = TaskId::new("shared-task").expect("task id");

    for round in 0..25 {
        let reply = service
            .request_feedback(
                FeedbackRequest::new("again")
                    .with_task_id(task_id.clone())
                    .with_timeout(Duration::from_secs(5)),
            )
            .expect("request feedback");
        assert_eq!(reply.status, ReplyStatus::Completed, "round {round}");
        assert_eq!(reply.task_id, task_id);
        assert_eq!(
            reply.result.content,
            vec![ContentItem::text("reply to again")]
        );
    }

    let coordinator = service.coordinator();
    assert!(wait_until(Duration::from_secs(1), || {
        coordinator.active_session_count() == 0
    }));
    let journal = journal.lock().expect("journal lock");
    assert_eq!(journal.shown.len(), 25);
    assert_eq!(journal.closed.len(), 25);
}

#[test]
fn integration_resolved_options_reach_the_presentation_surface() {
    let (service, journal) = service_with_script(&[(
        "这个方案是否可行？",
        ScriptedAction::Reply(Duration::from_millis(10)),
    )]);

    let reply = service
        .request_feedback(
            FeedbackRequest::new("这个方案是否可行？").with_timeout(Duration::from_secs(5)),
        )
        .expect("request feedback");
    assert_eq!(reply.status, ReplyStatus::Completed);
    assert_eq!(reply.resolution.strategy, Some("rule_engine"));

    let journal = journal.lock().expect("journal lock");
    assert_eq!(journal.shown.len(), 1);
    assert_eq!(journal.shown[0].options, reply.resolution.options);
    assert_eq!(journal.shown[0].options[0], "是的");
}

#[test]
fn integration_shutdown_releases_waiting_callers() {
    let (service, _journal) = service_with_script(&[("pending", ScriptedAction::Ignore)]);

    let caller = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            service
                .request_feedback(
                    FeedbackRequest::new("pending").with_timeout(Duration::from_secs(10)),
                )
                .expect("pending request")
        })
    };
    let coordinator = Arc::clone(service.coordinator());
    assert!(wait_until(Duration::from_secs(1), || {
        coordinator.active_session_count() == 1
    }));

    let started = Instant::now();
    coordinator.shutdown();
    let reply = caller.join().expect("caller thread");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(reply.status, ReplyStatus::Cancelled);
    assert!(reply.result.is_empty());
    assert!(!coordinator.is_running());
}
