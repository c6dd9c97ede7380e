//! Goal and step execution: ordering, control flow, skip rules

use serde_json::json;
use std::sync::Arc;

use super::helpers::*;
use crate::engine::errors::{EngineError, ErrorKind};
use crate::engine::step::run_once_key;
use crate::engine::Engine;
use crate::modules::RegistryError;
use crate::settings::{InMemorySettings, Settings, RUN_ONCE_OWNER};
use crate::types::{Goal, GoalCall, GoalLibrary, GoalStep, Instruction, Val};

#[tokio::test]
async fn test_steps_run_in_order() {
    let probe = Probe::default();
    let mut engine = engine(
        vec![Goal::new("Main", vec![record("one"), record("two"), record("three")])],
        vec![],
        &probe,
    );

    let result = engine.run(&["Main"]).await.unwrap();
    assert_eq!(result, None);
    assert_eq!(probe.entries(), vec!["one", "two", "three"]);
    assert!(engine.call_stack().is_empty());
}

#[tokio::test]
async fn test_setup_goals_run_first() {
    let probe = Probe::default();
    let mut engine = engine(
        vec![
            Goal::new("Main", vec![record("main")]),
            Goal::new("Setup", vec![record("setup")]).setup(),
        ],
        vec![],
        &probe,
    );

    engine.run(&["Main"]).await.unwrap();
    assert_eq!(probe.entries(), vec!["setup", "main"]);
}

#[tokio::test]
async fn test_default_goal_used_without_names() {
    let probe = Probe::default();
    let mut file = crate::types::GoalLibraryFile::default();
    file.goals.push(Goal::new("Start", vec![record("start")]));
    file.default_goal = Some("Start".into());
    let mut engine = Engine::builder(Arc::new(GoalLibrary::from_file(file)))
        .registry(probe.registry())
        .config(test_config())
        .build();

    engine.run(&[]).await.unwrap();
    assert_eq!(probe.entries(), vec!["start"]);
}

#[tokio::test]
async fn test_unknown_goal_suggests_name() {
    let probe = Probe::default();
    let mut engine = engine(vec![Goal::new("Main", vec![record("x")])], vec![], &probe);

    let err = engine.run(&["Mian"]).await.unwrap_err();
    let EngineError::GoalNotFound { suggestion, .. } = &err else {
        unreachable!("Expected GoalNotFound, got {:?}", err);
    };
    assert_eq!(suggestion.as_deref(), Some("Main"));
    assert!(err.to_string().contains("Did you mean 'Main'?"));
    assert!(probe.entries().is_empty());
}

#[tokio::test]
async fn test_level_two_exit_stops_two_iterations() {
    let probe = Probe::default();
    let mut engine = engine(
        vec![
            Goal::new("A", vec![record("a1"), call("B"), record("a2")]),
            Goal::new("B", vec![record("b1"), call("C"), record("b2")]),
            Goal::new("C", vec![record("c1"), end(2), record("c2")]),
        ],
        vec![],
        &probe,
    );

    engine.run(&["A"]).await.unwrap();
    assert_eq!(probe.entries(), vec!["a1", "b1", "c1", "a2"]);
}

#[tokio::test]
async fn test_goal_return_value_flows_to_caller() {
    let probe = Probe::default();
    let compute = Goal::new(
        "Compute",
        vec![GoalStep::new(
            "goal",
            Instruction::new("return").param("value", json!("%n+1%")),
        )],
    );
    let main = Goal::new(
        "Main",
        vec![
            set("n", json!(41)),
            GoalStep::new(
                "goal",
                Instruction::new("call")
                    .param("name", json!("Compute"))
                    .returns("answer"),
            ),
            GoalStep::new(
                "goal",
                Instruction::new("return").param("value", json!("%answer%")),
            ),
            record("unreachable"),
        ],
    );
    let mut engine = engine(vec![main, compute], vec![], &probe);

    let result = engine.run(&["Main"]).await.unwrap();
    assert_eq!(result, Some(Val::Num(42.0)));
    assert!(probe.entries().is_empty());
}

#[tokio::test]
async fn test_goal_call_binds_parameters() {
    let probe = Probe::default();
    let main = Goal::new(
        "Main",
        vec![
            set("user", json!("Ada")),
            GoalStep::new(
                "goal",
                Instruction::new("call")
                    .param("name", json!("Greet"))
                    .param("parameters", json!({"who": "%user%"})),
            ),
        ],
    );
    let greet = Goal::new("Greet", vec![record("hello %who%")]);
    let mut engine = engine(vec![main, greet], vec![], &probe);

    engine.run(&["Main"]).await.unwrap();
    assert_eq!(probe.entries(), vec!["hello Ada"]);
}

#[tokio::test]
async fn test_direct_goal_call_with_extra_parameters() {
    let probe = Probe::default();
    let mut engine = engine(vec![Goal::new("Greet", vec![record("hi %who%")])], vec![], &probe);

    let extra = maplit::hashmap! { "who".to_string() => Val::Str("Grace".into()) };
    engine.call_goal(&GoalCall::new("Greet"), extra).await.unwrap();
    assert_eq!(probe.entries(), vec!["hi Grace"]);
}

#[tokio::test]
async fn test_conditional_block() {
    let probe = Probe::default();
    let main = Goal::new(
        "Main",
        vec![
            condition(json!(false)),
            record("skipped").with_indent(1),
            record("always"),
            set("flag", json!(true)),
            condition(json!("%flag%")),
            record("taken").with_indent(1),
            record("nested").with_indent(2),
        ],
    );
    let library = Arc::new(GoalLibrary::new(vec![main], vec![]));
    let mut engine = Engine::builder(library.clone())
        .registry(probe.registry())
        .config(test_config())
        .build();

    engine.run(&["Main"]).await.unwrap();
    assert_eq!(probe.entries(), vec!["always", "taken"]);

    // blocks are re-evaluated on the next run, not left open
    engine.run(&["Main"]).await.unwrap();
    assert_eq!(probe.entries(), vec!["always", "taken", "always", "taken"]);
}

#[tokio::test(start_paused = true)]
async fn test_conditional_blocks_are_per_engine() {
    let probe = Probe::default();
    let main = Goal::new(
        "Main",
        vec![
            condition(json!("%flag%")),
            slow(50).with_indent(1),
            record("body %flag%").with_indent(1),
        ],
    );
    let library = Arc::new(GoalLibrary::new(vec![main], vec![]));
    let build = |flag: bool| {
        let mut engine = Engine::builder(library.clone())
            .registry(probe.registry())
            .config(test_config())
            .build();
        engine.memory_mut().put("flag", Val::Bool(flag)).unwrap();
        engine
    };
    let mut taken = build(true);
    let mut skipped = build(false);

    let (first, second) = tokio::join!(taken.run(&["Main"]), async {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        skipped.run(&["Main"]).await
    });
    first.unwrap();
    second.unwrap();

    assert_eq!(probe.entries(), vec!["slow:start", "slow:end", "body true"]);
}

#[tokio::test]
async fn test_disabled_step_and_module_are_skipped() {
    let probe = Probe::default();
    let mut engine = engine(
        vec![
            Goal::new("Main", vec![record("off").disabled(), record("on")]),
            Goal::new("Other", vec![record("probe off"), set("reached", json!(true))]),
        ],
        vec![],
        &probe,
    );

    engine.run(&["Main"]).await.unwrap();
    assert_eq!(probe.entries(), vec!["on"]);

    engine.registry_mut().disable("probe");
    engine.run(&["Other"]).await.unwrap();
    assert_eq!(probe.entries(), vec!["on"]);
    assert_eq!(engine.memory().get_value("reached").unwrap(), Val::Bool(true));
}

#[tokio::test]
async fn test_unregistered_module_is_configuration_error() {
    let probe = Probe::default();
    let step = GoalStep::new("prob", Instruction::new("record"))
        .with_handler(crate::types::ErrorHandler::catch_all().retry(3, 0));
    let mut engine = engine(vec![Goal::new("Main", vec![step])], vec![], &probe);

    let err = engine.run(&["Main"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    let EngineError::Registry(RegistryError::NotRegistered { suggestion, .. }) = &err else {
        unreachable!("Expected NotRegistered, got {:?}", err);
    };
    assert_eq!(suggestion.as_deref(), Some("probe"));
}

#[tokio::test]
async fn test_unknown_function_suggests_name() {
    let probe = Probe::default();
    let step = GoalStep::new("probe", Instruction::new("recrod"));
    let mut engine = engine(vec![Goal::new("Main", vec![step])], vec![], &probe);

    let err = engine.run(&["Main"]).await.unwrap_err();
    let EngineError::FunctionNotFound { suggestion, .. } = &err else {
        unreachable!("Expected FunctionNotFound, got {:?}", err);
    };
    assert_eq!(suggestion.as_deref(), Some("record"));
}

#[tokio::test]
async fn test_run_once_step_runs_once_across_engines() {
    let probe = Probe::default();
    let library = Arc::new(GoalLibrary::new(
        vec![Goal::new("Main", vec![record("once").run_once(), record("every")])],
        vec![],
    ));
    let settings: Arc<dyn Settings> = Arc::new(InMemorySettings::new());
    let build = || {
        Engine::builder(library.clone())
            .registry(probe.registry())
            .settings(settings.clone())
            .config(test_config())
            .build()
    };

    let mut first = build();
    first.run(&["Main"]).await.unwrap();
    first.run(&["Main"]).await.unwrap();
    let mut second = build();
    second.run(&["Main"]).await.unwrap();

    assert_eq!(probe.count("once"), 1);
    assert_eq!(probe.count("every"), 3);
    let goal = library.get("Main").unwrap();
    let completed = settings.get(RUN_ONCE_OWNER, &run_once_key(&goal, &goal.steps[0]));
    assert!(completed.is_some_and(|at| at.as_str().is_some()));
}

#[tokio::test]
async fn test_recursion_depth_is_bounded() {
    let probe = Probe::default();
    let mut engine = engine(vec![Goal::new("Loop", vec![call("Loop")])], vec![], &probe);

    let err = engine.run(&["Loop"]).await.unwrap_err();
    let EngineError::StackOverflow { depth, trace } = &err else {
        unreachable!("Expected StackOverflow, got {:?}", err);
    };
    assert_eq!(*depth, 16);
    assert!(trace.contains("Loop"));
    assert!(engine.call_stack().is_empty());
}

#[tokio::test]
async fn test_injection_applies_only_inside_goal() {
    let probe = Probe::default();
    let mut engine = engine(
        vec![
            Goal::new("Main", vec![call("Injected"), record("outer")]),
            Goal::new("Injected", vec![record("inner")]).with_injection("probe", "altprobe"),
        ],
        vec![],
        &probe,
    );

    engine.run(&["Main"]).await.unwrap();
    assert_eq!(probe.entries(), vec!["alt:inner", "outer"]);
    assert!(!engine.registry().is_disabled("probe"));
}

#[tokio::test]
async fn test_context_cache_survives_steps_until_reset() {
    let probe = Probe::default();
    let memo = || {
        GoalStep::new("probe", Instruction::new("memo").param("label", json!("token")))
    };
    let mut engine = engine(vec![Goal::new("Main", vec![memo(), memo()])], vec![], &probe);

    engine.run(&["Main"]).await.unwrap();
    assert_eq!(probe.count("computed:token"), 1);

    engine.reset();
    engine.run(&["Main"]).await.unwrap();
    assert_eq!(probe.count("computed:token"), 2);
}

#[tokio::test]
async fn test_reset_clears_instance_variables() {
    let probe = Probe::default();
    let main = Goal::new(
        "Main",
        vec![
            set("local", json!(1)),
            GoalStep::new(
                "variable",
                Instruction::new("set_static")
                    .param("name", json!("shared"))
                    .param("value", json!(2)),
            ),
        ],
    );
    let mut engine = engine(vec![main], vec![], &probe);

    engine.run(&["Main"]).await.unwrap();
    engine.reset();
    assert!(engine.memory().get_value("local").unwrap().is_null());
    assert_eq!(engine.memory().get_value("shared").unwrap(), Val::Num(2.0));
}
