use gsd_core::kernel::{BudgetMode, KernelSnapshot};
use gsd_core::protocol::{
    create_message, create_reply, MessageOptions, MessagePayload, MessageType, ReplyOptions,
};
use gsd_core::{Kernel, KernelConfig, KernelError, KernelState};
use tokio_test::{assert_err, assert_ok};

fn kernel() -> Kernel {
    let mut kernel = assert_ok!(Kernel::from_config(&KernelConfig::default()));
    kernel.start();
    kernel
}

#[test]
fn default_config_schedules_every_engine_by_priority() {
    let mut kernel = kernel();
    let report = assert_ok!(kernel.tick());
    assert_eq!(report.tick_count, 1);
    assert_eq!(
        report.scheduled,
        vec!["router", "planner", "io", "renderer", "formatter", "observer"]
    );
}

#[test]
fn tick_count_advances_by_one_per_tick() {
    let mut kernel = kernel();
    for expected in 1..=25 {
        assert_eq!(assert_ok!(kernel.tick()).tick_count, expected);
    }
    kernel.stop();
    assert_err!(kernel.tick());
    assert_eq!(kernel.tick_count(), 25);
}

#[test]
fn request_reply_exchange_through_mailboxes() {
    let mut kernel = kernel();

    let request = assert_ok!(create_message(
        MessageOptions::new(
            "planner",
            "io",
            MessagePayload::IoRead {
                path: ".planning/ROADMAP.md".into(),
            },
        )
        .with_reply_port("planner")
        .with_priority(5)
        .with_token_cost(40),
    ));
    assert_ok!(kernel.send_message(request.clone()));
    assert_ok!(kernel.tick());

    let inbox = kernel.receive_messages("io");
    assert_eq!(inbox, vec![request.clone()]);
    assert!(kernel.receive_messages("io").is_empty());

    let reply = assert_ok!(create_reply(
        &inbox[0],
        ReplyOptions::new(MessagePayload::IoResult {
            path: ".planning/ROADMAP.md".into(),
            ok: true,
            content: Some("# Roadmap".into()),
        })
        .with_token_cost(10),
    ));
    assert_ok!(kernel.send_message(reply));

    let answers = kernel.receive_messages("planner");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].message_type(), MessageType::IoResult);
    assert_eq!(answers[0].in_reply_to(), Some(request.id()));
    assert_eq!(answers[0].sender(), "io");

    assert_eq!(kernel.get_budget_status("planner").spent, 40);
    assert_eq!(kernel.get_budget_status("io").spent, 10);
    assert_eq!(
        kernel.get_budget_status("io").remaining,
        KernelConfig::default().total_budget as i64 - 50
    );
}

#[test]
fn priority_does_not_reorder_mailboxes() {
    let mut kernel = kernel();
    let low = assert_ok!(create_message(
        MessageOptions::new("router", "renderer", MessagePayload::Ping).with_priority(-100)
    ));
    let high = assert_ok!(create_message(
        MessageOptions::new("router", "renderer", MessagePayload::Ping).with_priority(120)
    ));
    assert_ok!(kernel.send_message(low.clone()));
    assert_ok!(kernel.send_message(high.clone()));
    assert_eq!(kernel.receive_messages("renderer"), vec![low, high]);
}

#[test]
fn sleeping_engines_still_receive_mail() {
    let mut kernel = kernel();
    assert_ok!(kernel.sleep("observer"));
    let event = assert_ok!(create_message(MessageOptions::new(
        "router",
        "observer",
        MessagePayload::ObserveEvent {
            event: "phase-complete".into(),
            detail: serde_json::json!({"phase": 3}),
        },
    )));
    assert_ok!(kernel.send_message(event));

    let report = assert_ok!(kernel.tick());
    assert!(!report.scheduled.contains(&"observer".to_string()));
    assert_eq!(kernel.get_pending_messages("observer"), 1);

    assert_ok!(kernel.wake("observer"));
    assert_eq!(assert_ok!(kernel.tick()).scheduled.last().unwrap(), "observer");
}

#[test]
fn enforced_budget_from_config() {
    let config = KernelConfig {
        total_budget: 100,
        budget_mode: BudgetMode::Enforced,
        ..KernelConfig::default()
    };
    let mut kernel = assert_ok!(Kernel::from_config(&config));
    assert_ok!(kernel.spend("planner", 60));
    let err = assert_err!(kernel.spend("renderer", 41));
    assert_eq!(
        err,
        KernelError::BudgetExhausted {
            engine: "renderer".into(),
            attempted: 41,
            remaining: 40,
        }
    );
    assert_ok!(kernel.spend("renderer", 40));
}

#[test]
fn snapshot_serializes_for_introspection() {
    let mut kernel = kernel();
    assert_ok!(kernel.tick());
    assert_ok!(kernel.spend("router", 9));

    let snapshot = kernel.get_state();
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["state"], "running");
    assert_eq!(json["tickCount"], 1);
    assert_eq!(json["engines"][0]["engineName"], "router");
    assert_eq!(json["engines"][0]["spent"], 9);

    let back: KernelSnapshot = serde_json::from_value(json).unwrap();
    assert_eq!(back, snapshot);
    assert_eq!(back.state, KernelState::Running);
}

#[test]
fn independent_kernels_do_not_share_state() {
    let mut a = kernel();
    let b = kernel();
    assert_ok!(a.spend("io", 500));
    assert_eq!(a.get_budget_status("io").spent, 500);
    assert_eq!(b.get_budget_status("io").spent, 0);
}
