//! Integration tests for tree composition, reports, and teardown.

use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use rigd::drivers::Driver;
use rigd::registry::{DuplicateOperationError, MethodRegistry, UnaryFn};
use rigd::tree::{compose, report, teardown, ComposeError, DriverRegistry, NodeSpec};
use rigd::wire::Value;

// ── Test drivers ─────────────────────────────────────────────────────────────

/// Driver that counts how many times its release hook actually ran.
struct Counting {
    releases: Arc<AtomicUsize>,
    fail_release: bool,
}

#[async_trait]
impl Driver for Counting {
    fn driver_type(&self) -> &'static str {
        "counting"
    }

    fn export(
        self: Arc<Self>,
        registry: &mut MethodRegistry,
    ) -> Result<(), DuplicateOperationError> {
        registry.register_unary("noop", UnaryFn(|_args| async { Ok(Value::Bool(true)) }))
    }

    async fn release(&self) -> anyhow::Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            anyhow::bail!("relay wedged");
        }
        Ok(())
    }
}

fn counting_registry(releases: &Arc<AtomicUsize>, fail_type: Option<&str>) -> DriverRegistry {
    let mut drivers = DriverRegistry::builtin();
    let counter = releases.clone();
    drivers.register("counting", move |_| {
        Ok(Arc::new(Counting {
            releases: counter.clone(),
            fail_release: false,
        }) as Arc<dyn Driver>)
    });
    if let Some(name) = fail_type {
        let counter = releases.clone();
        drivers.register(name, move |_| {
            Ok(Arc::new(Counting {
                releases: counter.clone(),
                fail_release: true,
            }) as Arc<dyn Driver>)
        });
    }
    drivers
}

// ── Composition ──────────────────────────────────────────────────────────────

const BENCH_YAML: &str = r#"
labels:
  rig.host/bench: lab-2
children:
  power:
    type: mock-power
    config:
      readings:
        - { voltage: 5.1, current: 0.4 }
  dut:
    children:
      power:
        type: mock-power
"#;

#[tokio::test]
async fn yaml_description_composes_a_nested_tree() {
    let spec = NodeSpec::from_yaml(BENCH_YAML).unwrap();
    let root = compose(&DriverRegistry::builtin(), &spec).unwrap();

    assert_eq!(root.name(), "root");
    assert_eq!(root.labels().get("rig.host/bench").unwrap(), "lab-2");

    let dut_power = root
        .resolve(&["dut".to_string(), "power".to_string()])
        .unwrap();
    assert_eq!(dut_power.path_string(), "dut.power");
    assert_eq!(dut_power.parent().unwrap().name(), "dut");
    // Per-node uniqueness: both `power` nodes export `on` without clashing.
    assert!(dut_power.registry().kind("on").is_some());
    assert!(root
        .resolve(&["power".to_string()])
        .unwrap()
        .registry()
        .kind("on")
        .is_some());
}

#[tokio::test]
async fn yaml_description_loads_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(BENCH_YAML.as_bytes()).unwrap();

    let spec = NodeSpec::from_yaml_path(file.path()).unwrap();
    let root = compose(&DriverRegistry::builtin(), &spec).unwrap();
    assert!(root.resolve(&["dut".to_string()]).is_ok());
}

#[tokio::test]
async fn reports_list_every_node_parents_first() {
    let spec = NodeSpec::from_yaml(BENCH_YAML).unwrap();
    let root = compose(&DriverRegistry::builtin(), &spec).unwrap();

    let reports = report(&root);
    assert_eq!(reports.len(), 4);
    assert!(reports[0].parent_uuid.is_empty());

    let power = reports
        .iter()
        .find(|r| r.labels.get("rig.host/path").map(String::as_str) == Some("power"))
        .expect("power node reported");
    assert_eq!(power.labels.get("rig.host/type").unwrap(), "mock-power");
    let ops: Vec<&str> = power.operations.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(ops, vec!["off", "on", "read"]);
}

#[tokio::test]
async fn unknown_type_fails_with_the_offending_path() {
    let spec = NodeSpec::from_yaml(
        r#"
children:
  serial:
    type: uart-9000
"#,
    )
    .unwrap();
    let err = compose(&DriverRegistry::builtin(), &spec).unwrap_err();
    assert!(
        matches!(err, ComposeError::UnknownDriverType { ref path, ref driver_type }
            if path == "serial" && driver_type == "uart-9000")
    );
}

#[tokio::test]
async fn duplicate_operation_registration_aborts_composition() {
    struct Clashing;

    #[async_trait]
    impl Driver for Clashing {
        fn driver_type(&self) -> &'static str {
            "clashing"
        }

        fn export(
            self: Arc<Self>,
            registry: &mut MethodRegistry,
        ) -> Result<(), DuplicateOperationError> {
            registry.register_unary("on", UnaryFn(|_| async { Ok(Value::Bool(true)) }))?;
            registry.register_unary("on", UnaryFn(|_| async { Ok(Value::Bool(false)) }))?;
            Ok(())
        }
    }

    let mut drivers = DriverRegistry::builtin();
    drivers.register("clashing", |_| Ok(Arc::new(Clashing) as Arc<dyn Driver>));
    let spec = NodeSpec::from_yaml("children: { relay: { type: clashing } }").unwrap();

    let err = compose(&drivers, &spec).unwrap_err();
    assert!(
        matches!(err, ComposeError::DuplicateOperation { ref path, ref name }
            if path == "relay" && name == "on")
    );
}

// ── Teardown ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn teardown_releases_every_node_exactly_once() {
    let releases = Arc::new(AtomicUsize::new(0));
    let drivers = counting_registry(&releases, None);
    let spec = NodeSpec::from_yaml(
        r#"
children:
  a:
    type: counting
  b:
    type: counting
    children:
      c:
        type: counting
"#,
    )
    .unwrap();
    let root = compose(&drivers, &spec).unwrap();

    teardown(&root).await.unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 3);

    // Idempotent: a second pass never re-runs release hooks.
    teardown(&root).await.unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn teardown_is_best_effort_and_collects_failures() {
    let releases = Arc::new(AtomicUsize::new(0));
    let drivers = counting_registry(&releases, Some("wedged"));
    let spec = NodeSpec::from_yaml(
        r#"
children:
  bad:
    type: wedged
  good:
    type: counting
  also-good:
    type: counting
"#,
    )
    .unwrap();
    let root = compose(&drivers, &spec).unwrap();

    let err = teardown(&root).await.unwrap_err();
    assert_eq!(err.failures.len(), 1);
    assert_eq!(err.failures[0].path, "bad");
    assert!(err.failures[0].source.to_string().contains("relay wedged"));
    // Siblings were still attempted: 3 counting drivers all released.
    assert_eq!(releases.load(Ordering::SeqCst), 3);
}
