//! End-to-end flows through the command layer: two nodes sharing a
//! filesystem-rooted hub, exercising resolution, metadata sync and content
//! transfer together.

use tempfile::TempDir;
use voltree::commands::{self, Node};
use voltree::config::Config;
use voltree::store::MetaStore;
use voltree::VoltreeError;

struct World {
    _dir: TempDir,
    alpha: Node,
    beta: Node,
    config: Config,
}

async fn world() -> World {
    let dir = TempDir::new().unwrap();
    let alpha = Node::open(&dir.path().join("alpha")).await.unwrap();
    let beta = Node::open(&dir.path().join("beta")).await.unwrap();
    let config = Config {
        hub_url: Some(format!("file://{}", dir.path().join("hub").display())),
        ..Default::default()
    };
    World {
        _dir: dir,
        alpha,
        beta,
        config,
    }
}

async fn write_and_snapshot(node: &Node, volume: &str, name: &str, data: &[u8]) {
    let vol = &node.current.find_volumes(volume).await.unwrap()[0];
    std::fs::write(&vol.mount_path, data).unwrap();
    commands::snapshot(node, volume, Some(name), None, false, None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_publish_fetch_pull_clone_across_nodes() {
    let w = world().await;

    // Node alpha builds a volume-set with one snapshot and publishes it.
    commands::init(&w.alpha, "team/myapp", None, Some("demo set"))
        .await
        .unwrap();
    commands::create(&w.alpha, "myapp", Some("work"), None)
        .await
        .unwrap();
    write_and_snapshot(&w.alpha, "work", "v1", b"release one contents").await;
    commands::sync(&w.alpha, &w.config, Some("myapp")).await.unwrap();
    commands::push(&w.alpha, &w.config, "v1").await.unwrap();

    // Node beta has never heard of it; fetch brings the metadata over.
    let out = commands::fetch(&w.beta, &w.config, Some("myapp")).await.unwrap();
    assert!(out.contains("synchronized"));
    let sets = w.beta.current.find_volume_sets("myapp").await.unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].qualified_name(), "team/myapp");

    // The snapshot arrived without content; pull localizes it.
    let snap = &w.beta.current.find_snapshots("v1").await.unwrap()[0];
    let err = commands::clone(&w.beta, "v1", Some("copy")).await.unwrap_err();
    assert!(matches!(err, VoltreeError::InvalidArgument(_)));
    commands::pull(&w.beta, &w.config, "v1").await.unwrap();

    commands::clone(&w.beta, "v1", Some("copy")).await.unwrap();
    let copy = &w.beta.current.find_volumes("copy").await.unwrap()[0];
    assert_eq!(
        std::fs::read(&copy.mount_path).unwrap(),
        b"release one contents"
    );
    assert_eq!(copy.base.as_ref(), Some(&snap.id));
}

#[tokio::test]
async fn test_branch_advance_syncs_without_spurious_conflict() {
    let w = world().await;

    commands::init(&w.alpha, "myapp", None, None).await.unwrap();
    commands::create(&w.alpha, "myapp", Some("work"), None)
        .await
        .unwrap();
    write_and_snapshot(&w.alpha, "work", "s1", b"one").await;
    commands::sync(&w.alpha, &w.config, Some("myapp")).await.unwrap();
    commands::fetch(&w.beta, &w.config, Some("myapp")).await.unwrap();

    // Alpha advances main to s2 and re-syncs; beta fetches the advance.
    write_and_snapshot(&w.alpha, "work", "s2", b"two").await;
    let out = commands::sync(&w.alpha, &w.config, Some("myapp")).await.unwrap();
    assert!(!out.contains("conflicts"));
    let out = commands::fetch(&w.beta, &w.config, Some("myapp")).await.unwrap();
    assert!(!out.contains("conflicts"));

    let vs = &w.beta.current.find_volume_sets("myapp").await.unwrap()[0];
    let main = w.beta.current.get_branch(&vs.id, "main").await.unwrap().unwrap();
    let s2 = &w.beta.current.find_snapshots("s2").await.unwrap()[0];
    assert_eq!(main.tip, s2.id);
    let s1 = &w.beta.current.find_snapshots("s1").await.unwrap()[0];
    assert_eq!(s2.parent.as_ref(), Some(&s1.id));
}

#[tokio::test]
async fn test_divergent_branch_reported_and_remote_wins() {
    let w = world().await;

    commands::init(&w.alpha, "myapp", None, None).await.unwrap();
    commands::create(&w.alpha, "myapp", Some("work"), None)
        .await
        .unwrap();
    write_and_snapshot(&w.alpha, "work", "s1", b"one").await;
    commands::sync(&w.alpha, &w.config, Some("myapp")).await.unwrap();
    commands::push(&w.alpha, &w.config, "myapp").await.unwrap();

    // Beta picks up the set and builds its own line of history.
    commands::fetch(&w.beta, &w.config, Some("myapp")).await.unwrap();
    commands::pull(&w.beta, &w.config, "myapp").await.unwrap();
    commands::clone(&w.beta, "main", Some("work-b")).await.unwrap();
    write_and_snapshot(&w.beta, "work-b", "s2-beta", b"beta line").await;

    // Meanwhile alpha advances main too and publishes first.
    write_and_snapshot(&w.alpha, "work", "s2-alpha", b"alpha line").await;
    commands::sync(&w.alpha, &w.config, Some("myapp")).await.unwrap();

    // Beta's sync diverges on main: remote wins, conflict is surfaced with
    // the displaced local tip still recoverable from the report.
    let out = commands::sync(&w.beta, &w.config, Some("myapp")).await.unwrap();
    assert!(out.contains("conflicts"));
    assert!(out.contains("main"));

    let vs = &w.beta.current.find_volume_sets("myapp").await.unwrap()[0];
    let main = w.beta.current.get_branch(&vs.id, "main").await.unwrap().unwrap();
    let s2a = &w.beta.current.find_snapshots("s2-alpha").await.unwrap()[0];
    assert_eq!(main.tip, s2a.id);
    // Beta's snapshot record itself is not lost.
    assert_eq!(w.beta.current.find_snapshots("s2-beta").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_push_whole_volumeset_then_second_node_pulls() {
    let w = world().await;

    commands::init(&w.alpha, "myapp", None, None).await.unwrap();
    commands::create(&w.alpha, "myapp", Some("work"), None)
        .await
        .unwrap();
    write_and_snapshot(&w.alpha, "work", "s1", b"first payload").await;
    write_and_snapshot(&w.alpha, "work", "s2", b"first payload plus more").await;
    commands::sync(&w.alpha, &w.config, Some("myapp")).await.unwrap();
    commands::push(&w.alpha, &w.config, "myapp").await.unwrap();

    commands::fetch(&w.beta, &w.config, Some("myapp")).await.unwrap();
    let out = commands::pull(&w.beta, &w.config, "myapp").await.unwrap();
    assert!(out.contains("pulled 2 snapshot(s)"));

    commands::clone(&w.beta, "s2", Some("copy")).await.unwrap();
    let copy = &w.beta.current.find_volumes("copy").await.unwrap()[0];
    assert_eq!(
        std::fs::read(&copy.mount_path).unwrap(),
        b"first payload plus more"
    );
}

#[tokio::test]
async fn test_sync_all_covers_every_volumeset() {
    let w = world().await;

    commands::init(&w.alpha, "one", None, None).await.unwrap();
    commands::init(&w.alpha, "two", None, None).await.unwrap();
    let out = commands::sync(&w.alpha, &w.config, None).await.unwrap();
    assert_eq!(out.matches("synchronized volumeset").count(), 2);

    let out = commands::fetch(&w.beta, &w.config, None).await.unwrap();
    assert_eq!(out.matches("synchronized volumeset").count(), 2);
    assert_eq!(w.beta.current.find_volume_sets("one").await.unwrap().len(), 1);
    assert_eq!(w.beta.current.find_volume_sets("two").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sync_without_hub_is_a_config_error() {
    let w = world().await;
    commands::init(&w.alpha, "myapp", None, None).await.unwrap();
    let err = commands::sync(&w.alpha, &Config::default(), Some("myapp"))
        .await
        .unwrap_err();
    assert!(matches!(err, VoltreeError::Config(_)));
}
