//! Integration tests for run orchestration against in-memory collaborators.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reina_core::fakes::{
    MemoryPlatform, MemoryScm, PlatformCall, ScmCall, ScriptedConfirm, StaticManifests,
};
use reina_core::{
    ConfigVarDirectives, CopyDirective, ExecutionGroup, ExecutionOutcome, JobResult, Manifest,
    ManifestReader, Orchestrator, ProvisionStep, Project, ReinaConfig, ReinaError, ScmError,
};

struct Fixture {
    platform: Arc<MemoryPlatform>,
    scm: Arc<MemoryScm>,
    confirm: Arc<ScriptedConfirm>,
    orchestrator: Orchestrator,
    _workdir: tempfile::TempDir,
}

fn fixture(projects: Vec<Project>, confirm: ScriptedConfirm) -> Fixture {
    fixture_with(projects, confirm, |_| {})
}

fn fixture_with(
    projects: Vec<Project>,
    confirm: ScriptedConfirm,
    tweak: impl FnOnce(&mut ReinaConfig),
) -> Fixture {
    fixture_with_manifests(projects, confirm, Arc::new(StaticManifests::new()), tweak)
}

fn fixture_with_manifests(
    projects: Vec<Project>,
    confirm: ScriptedConfirm,
    manifests: Arc<dyn ManifestReader>,
    tweak: impl FnOnce(&mut ReinaConfig),
) -> Fixture {
    let workdir = tempfile::tempdir().unwrap();
    let mut config = ReinaConfig {
        app_name_prefix: "stg-".to_string(),
        domain_suffix: "example-domain".to_string(),
        cooldown_secs: 0,
        workdir: workdir.path().to_path_buf(),
        projects,
        ..Default::default()
    };
    tweak(&mut config);

    let platform = Arc::new(MemoryPlatform::new());
    let scm = Arc::new(MemoryScm::new());
    let confirm = Arc::new(confirm);
    let orchestrator = Orchestrator::new(
        Arc::new(config),
        platform.clone(),
        scm.clone(),
        manifests,
        confirm.clone(),
    );

    Fixture {
        platform,
        scm,
        confirm,
        orchestrator,
        _workdir: workdir,
    }
}

fn sequential(key: &str) -> Project {
    let mut project = Project::new(key, &format!("acme/{key}"));
    project.parallel = false;
    project
}

fn no_overrides() -> BTreeMap<String, String> {
    BTreeMap::new()
}

/// Panics while reading the manifest of one repository.
struct ExplodingManifests {
    repo: &'static str,
}

impl ManifestReader for ExplodingManifests {
    fn read(&self, repo_dir: &Path) -> JobResult<Manifest> {
        if repo_dir.ends_with(self.repo) {
            panic!("manifest exploded");
        }
        Ok(Manifest::default())
    }
}

/// Test: an over-long app name aborts before any platform or git call.
#[tokio::test]
async fn test_long_app_name_aborts_without_side_effects() {
    let f = fixture(
        vec![
            Project::new("api", "acme/api"),
            Project::new("a-very-long-project-name", "acme/long"),
        ],
        ScriptedConfirm::accepting(),
    );

    let err = f.orchestrator.run(42, &no_overrides()).await.unwrap_err();

    assert!(matches!(err, ReinaError::AppNameTooLong { .. }));
    assert!(f.platform.calls().is_empty(), "no platform call expected");
    assert!(f.scm.calls().is_empty(), "no git call expected");
}

/// Test: the same project key twice derives the same app name twice.
#[tokio::test]
async fn test_duplicate_app_names_abort_without_side_effects() {
    let f = fixture(
        vec![Project::new("api", "acme/api"), Project::new("api", "acme/api-next")],
        ScriptedConfirm::accepting(),
    );

    let err = f.orchestrator.run(42, &no_overrides()).await.unwrap_err();

    match err {
        ReinaError::DuplicateAppName(name) => assert_eq!(name, "stg-api-42"),
        other => panic!("expected duplicate app name, got {other:?}"),
    }
    assert!(f.platform.calls().is_empty());
    assert!(f.scm.calls().is_empty());
}

#[tokio::test]
async fn test_non_positive_pr_number_is_fatal() {
    let f = fixture(vec![Project::new("api", "acme/api")], ScriptedConfirm::accepting());

    let err = f.orchestrator.run(0, &no_overrides()).await.unwrap_err();

    assert!(matches!(err, ReinaError::InvalidPrNumber(0)));
    assert!(f.platform.calls().is_empty());
}

/// Test: a failing parallel job does not stop the sequential group.
#[tokio::test]
async fn test_parallel_scm_failure_is_isolated() {
    let f = fixture(
        vec![
            Project::new("api", "acme/api"),
            Project::new("web", "acme/web"),
            sequential("worker"),
        ],
        ScriptedConfirm::accepting(),
    );
    f.scm.fail_clone(
        "api",
        ScmError::Command {
            command: "git clone https://github.com/acme/api".to_string(),
            message: "fatal: repository 'https://github.com/acme/api/' not found".to_string(),
        },
    );

    let report = f.orchestrator.run(42, &no_overrides()).await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    let api = report.outcome_for("api").unwrap();
    assert_eq!(
        api.outcome,
        ExecutionOutcome::Failed {
            step: Some(ProvisionStep::SyncRepository),
            message: "fatal: repository 'https://github.com/acme/api/' not found".to_string(),
        }
    );
    assert!(report.outcome_for("web").unwrap().outcome.is_success());

    let worker = report.outcome_for("worker").unwrap();
    assert_eq!(worker.group, ExecutionGroup::Sequential);
    assert!(worker.outcome.is_success());
    assert_eq!(report.outcomes.last().unwrap().project, "worker");

    assert!(!f.platform.apps().contains(&"stg-api-42".to_string()));
    assert!(f.platform.apps().contains(&"stg-worker-42".to_string()));
}

/// Test: the run completes even when every job fails.
#[tokio::test]
async fn test_run_completes_when_every_job_fails() {
    let f = fixture(
        vec![Project::new("api", "acme/api"), sequential("web")],
        ScriptedConfirm::accepting(),
    );
    for repo in ["api", "web"] {
        f.scm.fail_clone(
            repo,
            ScmError::Command {
                command: "git clone".to_string(),
                message: "fatal: unable to access".to_string(),
            },
        );
    }

    let report = f.orchestrator.run(7, &no_overrides()).await.unwrap();

    assert_eq!(report.failed_count(), 2);
    assert_eq!(report.succeeded_count(), 0);
}

#[tokio::test]
async fn test_conflicting_apps_are_deleted_after_confirmation() {
    let f = fixture(
        vec![Project::new("api", "acme/api"), Project::new("web", "acme/web")],
        ScriptedConfirm::accepting(),
    );
    f.platform.add_app("stg-api-42");
    f.platform.add_app("unrelated-app");

    let report = f.orchestrator.run(42, &no_overrides()).await.unwrap();

    assert_eq!(report.deleted_apps, vec!["stg-api-42".to_string()]);
    assert_eq!(f.confirm.prompts(), vec![vec!["stg-api-42".to_string()]]);
    assert_eq!(report.succeeded_count(), 2);

    let calls = f.platform.calls();
    let delete_at = calls
        .iter()
        .position(|c| matches!(c, PlatformCall::DeleteApp { name } if name == "stg-api-42"))
        .unwrap();
    let first_create = calls
        .iter()
        .position(|c| matches!(c, PlatformCall::CreateApp { .. }))
        .unwrap();
    assert!(delete_at < first_create);
    assert!(f.platform.apps().contains(&"unrelated-app".to_string()));
}

#[tokio::test]
async fn test_declined_confirmation_aborts_run() {
    let f = fixture(vec![Project::new("api", "acme/api")], ScriptedConfirm::declining());
    f.platform.add_app("stg-api-42");

    let err = f.orchestrator.run(42, &no_overrides()).await.unwrap_err();

    assert!(matches!(err, ReinaError::ConfirmationDeclined));
    assert_eq!(
        f.platform.calls(),
        vec![PlatformCall::ListApps],
        "nothing but the listing may happen"
    );
    assert!(f.scm.calls().is_empty());
}

#[tokio::test]
async fn test_no_prompt_without_conflicts() {
    let f = fixture(vec![Project::new("api", "acme/api")], ScriptedConfirm::declining());

    let report = f.orchestrator.run(42, &no_overrides()).await.unwrap();

    assert!(f.confirm.prompts().is_empty());
    assert!(report.deleted_apps.is_empty());
    assert_eq!(report.succeeded_count(), 1);
}

#[tokio::test]
async fn test_branch_overrides_select_checkout_branch() {
    let f = fixture(
        vec![Project::new("api", "acme/api"), Project::new("web", "acme/web")],
        ScriptedConfirm::accepting(),
    );
    let overrides = BTreeMap::from([
        ("api".to_string(), "feature/login".to_string()),
        ("ghost".to_string(), "main".to_string()),
    ]);

    f.orchestrator.run(42, &overrides).await.unwrap();

    assert!(f.scm.calls_for("api").contains(&ScmCall::Checkout {
        repo: "api".to_string(),
        branch: "feature/login".to_string(),
    }));
    assert!(f.scm.calls_for("web").contains(&ScmCall::Checkout {
        repo: "web".to_string(),
        branch: "master".to_string(),
    }));
}

/// Test: the parallel pool never exceeds the configured concurrency.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_group_respects_concurrency_limit() {
    let projects = ["a", "b", "c", "d", "e", "f"]
        .iter()
        .map(|k| Project::new(k, &format!("acme/{k}")))
        .collect();
    let f = fixture_with(projects, ScriptedConfirm::accepting(), |config| {
        config.concurrency = 2;
    });
    f.platform.set_create_delay(Duration::from_millis(50));

    let report = f.orchestrator.run(1, &no_overrides()).await.unwrap();

    assert_eq!(report.succeeded_count(), 6);
    let max = f.platform.max_concurrent_creates();
    assert!(max >= 1 && max <= 2, "observed {max} concurrent creates");
}

/// Test: sequential jobs read variables of parallel apps that are already configured.
#[tokio::test]
async fn test_sequential_group_reads_parallel_apps() {
    let mut web = Project::new("web", "acme/web");
    web.config_vars = ConfigVarDirectives {
        vars: BTreeMap::from([("SESSION_SECRET".to_string(), "s3cr3t".to_string())]),
        ..Default::default()
    };
    let mut api = sequential("api");
    api.config_vars = ConfigVarDirectives {
        copy: vec![
            CopyDirective {
                from: "web#SESSION_SECRET".to_string(),
                to: "SESSION_SECRET".to_string(),
                append: None,
            },
            CopyDirective {
                from: "web#url".to_string(),
                to: "WEB_URL".to_string(),
                append: None,
            },
        ],
        ..Default::default()
    };
    let f = fixture(vec![api, web], ScriptedConfirm::accepting());

    let report = f.orchestrator.run(42, &no_overrides()).await.unwrap();

    assert_eq!(report.succeeded_count(), 2);
    let vars = f.platform.config_vars_of("stg-api-42").unwrap();
    assert_eq!(vars["SESSION_SECRET"], "s3cr3t");
    assert_eq!(vars["WEB_URL"], "https://stg-web-42.example-domain");
    assert_eq!(vars["APP_NAME"], "stg-api-42");
}

/// Test: a cross-app read of an app that does not exist fails only that job.
#[tokio::test]
async fn test_missing_cross_app_source_fails_only_that_job() {
    let mut api = Project::new("api", "acme/api");
    api.config_vars = ConfigVarDirectives {
        copy: vec![CopyDirective {
            from: "billing#TOKEN".to_string(),
            to: "BILLING_TOKEN".to_string(),
            append: None,
        }],
        ..Default::default()
    };
    let f = fixture(
        vec![api, Project::new("web", "acme/web")],
        ScriptedConfirm::accepting(),
    );

    let report = f.orchestrator.run(42, &no_overrides()).await.unwrap();

    match &report.outcome_for("api").unwrap().outcome {
        ExecutionOutcome::Failed { step, message } => {
            assert_eq!(*step, Some(ProvisionStep::SetEnvVars));
            assert!(message.contains("Couldn't find that app"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(report.outcome_for("web").unwrap().outcome.is_success());
}

#[tokio::test]
async fn test_report_metadata() {
    let f = fixture(vec![Project::new("api", "acme/api")], ScriptedConfirm::accepting());

    let report = f.orchestrator.run(42, &no_overrides()).await.unwrap();

    assert_eq!(report.pr_number, 42);
    assert!(!report.run_id.is_empty());
    assert!(report.finished_at >= report.started_at);
    assert_eq!(report.outcomes[0].app_name, "stg-api-42");
}

/// Test: a panicking job is reported as failed and the rest of the run goes on.
#[tokio::test]
async fn test_panicking_job_is_reported_and_siblings_continue() {
    let f = fixture_with_manifests(
        vec![
            Project::new("ok", "acme/ok"),
            Project::new("boom", "acme/boom"),
            sequential("s3"),
            sequential("s1"),
            sequential("s2"),
        ],
        ScriptedConfirm::accepting(),
        Arc::new(ExplodingManifests { repo: "boom" }),
        |_| {},
    );

    let report = f.orchestrator.run(5, &no_overrides()).await.unwrap();

    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(
        report.outcome_for("boom").unwrap().outcome,
        ExecutionOutcome::Failed {
            step: None,
            message: "manifest exploded".to_string(),
        }
    );
    assert_eq!(report.succeeded_count(), 4);

    let sequential_order: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|o| o.group == ExecutionGroup::Sequential)
        .map(|o| o.project.as_str())
        .collect();
    assert_eq!(sequential_order, vec!["s3", "s1", "s2"]);
    assert_eq!(report.outcomes[2].project, "s3");

    let creates: Vec<String> = f
        .platform
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            PlatformCall::CreateApp { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(creates, vec!["stg-ok-5", "stg-s3-5", "stg-s1-5", "stg-s2-5"]);
}
