use std::{path::Path, time::Duration};

use docroute::{
    DataDir,
    Error,
    LocalServices,
    Outcome,
    Router,
    Settings,
    collaborators::IndexReport,
    router::PathContext,
};

struct Fixture {
    router: Router,
    services: LocalServices,
    home: std::path::PathBuf,
    _tmp: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let home = tmp.path().join("home");
    std::fs::create_dir_all(&home).unwrap();

    let data_dir = DataDir::resolve(Some(&tmp.path().join("data"))).unwrap();
    let mut services = LocalServices::open(data_dir).unwrap();
    services.settings = Settings {
        degrade_gracefully: true,
        deadline: Duration::from_secs(30),
        ..Settings::default()
    };
    let router = services
        .router(PathContext {
            home: home.clone(),
            working_dir: home.clone(),
        })
        .unwrap();

    Fixture {
        router,
        services,
        home,
        _tmp: tmp,
    }
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn index_then_ask_in_a_new_collection() {
    let f = fixture();
    write(
        &f.home.join("reports/q3.md"),
        "# Q3 Report\n\nRevenue grew 12% in the third quarter.\n",
    );
    write(&f.home.join("reports/team.md"), "# Team\n\nWe hired two people.\n");

    f.router.route("create collection finance").await.unwrap();
    f.router.route("switch to finance").await.unwrap();

    let routed = f.router.route("index ~/reports").await.unwrap();
    assert_eq!(
        routed.outcome,
        Outcome::Indexed {
            report: IndexReport::Indexed {
                collection: "finance".to_string(),
                path: f.home.join("reports"),
                documents: 2,
            }
        }
    );

    let routed = f.router.route("How did revenue develop?").await.unwrap();
    let Outcome::Answer { text, sources } = routed.outcome else {
        panic!("expected an answer");
    };
    assert_eq!(sources.len(), 1);
    assert!(sources[0].document_id.as_str().ends_with("q3.md"));
    assert!(text.contains("Revenue grew 12%"), "answer was {text}");

    // The default collection has nothing indexed.
    f.router.route("switch to default").await.unwrap();
    let results = f.router.search("revenue").await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn switch_is_persisted_for_the_next_session() {
    let f = fixture();
    f.router.route("create collection notes").await.unwrap();
    f.router.route("switch to notes").await.unwrap();

    let next = f
        .services
        .router(PathContext {
            home: f.home.clone(),
            working_dir: f.home.clone(),
        })
        .unwrap();
    assert_eq!(next.active_collection().as_str(), "notes");
}

#[tokio::test]
async fn protected_collections_survive_delete_requests() {
    let f = fixture();
    f.router.route("create collection scratch").await.unwrap();
    f.router.route("switch to scratch").await.unwrap();

    for text in ["delete collection default", "delete collection scratch"] {
        let err = f.router.route(text).await.unwrap_err();
        assert!(
            matches!(err, Error::ProtectedCollectionViolation { .. }),
            "{text}: {err}"
        );
    }

    let Outcome::Collections { collections, .. } =
        f.router.route("list collections").await.unwrap().outcome
    else {
        panic!("expected a collection list");
    };
    assert_eq!(collections.len(), 2);
}

#[tokio::test]
async fn collection_active_in_another_session_is_not_deleted() {
    let f = fixture();
    f.router.route("create collection notes").await.unwrap();

    let other = f
        .services
        .router(PathContext {
            home: f.home.clone(),
            working_dir: f.home.clone(),
        })
        .unwrap();
    other.route("switch to notes").await.unwrap();

    // This session still answers from the default collection.
    assert_eq!(f.router.active_collection().as_str(), "default");
    let err = f.router.route("delete collection notes").await.unwrap_err();
    assert!(matches!(err, Error::ProtectedCollectionViolation { .. }));

    other.route("switch to default").await.unwrap();
    f.router.route("delete collection notes").await.unwrap();
}

#[tokio::test]
async fn filesystem_commands_touch_the_disk() {
    let f = fixture();
    f.router.route("mkdir ~/projects/new").await.unwrap();
    assert!(f.home.join("projects/new").is_dir());

    write(&f.home.join("draft.md"), "draft");
    f.router.route("move ~/draft.md to ~/projects/new").await.unwrap();
    assert!(f.home.join("projects/new/draft.md").exists());
    assert!(!f.home.join("draft.md").exists());

    let err = f.router.route("ls ../../etc").await.unwrap_err();
    assert!(err.is_security_refusal());
}

#[tokio::test]
async fn organize_by_customer_previews_and_moves_on_confirmation() {
    let f = fixture();
    let inbox = f.home.join("inbox");
    write(&inbox.join("offer.md"), "Customer: Acme Corp\n\nOffer for Q4.");
    write(&inbox.join("kickoff.md"), "Project: Apollo\n\nKickoff notes.");
    write(&inbox.join("misc.txt"), "random thoughts");

    let routed = f.router.route("organize ~/inbox by customer").await.unwrap();
    let Outcome::OrganizationPreview { plan } = routed.outcome else {
        panic!("expected a preview");
    };
    assert_eq!(plan.move_count(), 3);
    assert!(inbox.join("offer.md").exists(), "preview must not move files");

    let target = f.home.join("inbox_organized");
    let folders: Vec<_> = plan
        .proposals
        .iter()
        .map(|p| p.target_folder_path.clone())
        .collect();
    assert_eq!(
        folders,
        vec![
            target.join("Customers/Acme Corp"),
            target.join("Projects/Apollo"),
            target.join("Unsorted"),
        ]
    );

    let report = f.router.confirm_organization(&plan.id).await.unwrap();
    assert!(report.all_succeeded());
    assert!(target.join("Customers/Acme Corp/offer.md").exists());
    assert!(target.join("Projects/Apollo/kickoff.md").exists());
    assert!(target.join("Unsorted/misc.txt").exists());

    let err = f.router.confirm_organization(&plan.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidProposalState { .. }));
}

#[tokio::test]
async fn tampered_plan_is_refused() {
    let f = fixture();
    write(&f.home.join("inbox/a.md"), "Topic: Travel\n\nTickets.");

    let routed = f.router.route("organize ~/inbox").await.unwrap();
    let Outcome::OrganizationPreview { plan } = routed.outcome else {
        panic!("expected a preview");
    };

    let mut changed = plan.clone();
    changed.proposals[0].target_folder_path = f.home.join("elsewhere");
    f.services
        .config_db
        .put_proposal(&plan.id, &serde_json::to_vec(&changed).unwrap())
        .unwrap();

    let err = f.router.confirm_organization(&plan.id).await.unwrap_err();
    assert!(matches!(err, Error::ProposalMismatch { .. }));
    assert!(f.home.join("inbox/a.md").exists());
}
