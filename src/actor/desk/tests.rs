use std::path::Path;

use pretty_assertions::assert_eq;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

use super::*;
use crate::actor::sync::SyncEngine;
use crate::model::interaction::GestureHandle;
use crate::remote::memory::MemoryPreferenceStore;
use crate::remote::{Identity, Payload, Preferences};

type Resolve = fn(&WorkspaceLayout) -> Option<String>;

fn resolve(layout: &WorkspaceLayout) -> Option<String> {
    (!layout.title.starts_with("Broken")).then(|| layout.title.to_lowercase())
}

fn config() -> Config { Config::parse("").unwrap() }

fn config_with_defaults() -> Config {
    Config::parse(
        r#"
        [[startup.default_windows]]
        title = "Chart"
        x = 300
        y = 100

        [[startup.default_windows]]
        title = "News"
        x = 720
        y = 100
        "#,
    )
    .unwrap()
}

fn user() -> Identity { Identity::new("trader-1") }

fn setup(
    config: &Config,
    dir: &Path,
    remote: &MemoryPreferenceStore,
    identity: Option<Identity>,
) -> (Desk<String, Resolve>, SyncEngine<MemoryPreferenceStore>, Sender) {
    let (sync_tx, sync_rx) = actor::channel();
    let sync = SyncEngine::new(remote.clone(), sync_rx, config.sync.debounce, identity)
        .with_revision_store(LocalStore::new(dir));
    let (tx, rx) = actor::channel();
    let desk = Desk::new(config, resolve as Resolve, LocalStore::new(dir), sync_tx, rx);
    (desk, sync, tx)
}

fn send(tx: &Sender, command: Command) { tx.send(Event::Command(command)); }

fn open_at(title: &str, x: f64, y: f64) -> Command {
    Command::OpenWindow {
        title: title.into(),
        position: Some(Point::new(x, y)),
        size: Some(Size::new(300.0, 200.0)),
        component_state: None,
    }
}

async fn query(tx: &Sender) -> DeskSnapshot {
    let (reply, rx) = oneshot::channel();
    tx.send(Event::Query(reply));
    rx.await.unwrap()
}

/// Acknowledges every release and mount the way a responsive host would.
async fn ack_host(mut events: actor::Receiver<RegistryEvent>, tx: Sender) {
    while let Some((_, event)) = events.recv().await {
        match event {
            RegistryEvent::Opened { id, .. } => tx.send(Event::WindowMounted(id)),
            RegistryEvent::Closed { windows } => {
                for (id, _) in windows {
                    tx.send(Event::WindowReleased(id));
                }
            }
            RegistryEvent::Changed { .. } => {}
        }
    }
}

/// Queries until the in-flight switch is over, giving the acknowledging host
/// a chance to run between queries.
async fn settle(tx: &Sender) -> DeskSnapshot {
    for _ in 0..10 {
        let s = query(tx).await;
        if !s.switching {
            return s;
        }
        tokio::task::yield_now().await;
    }
    query(tx).await
}

fn titles(snapshot: &DeskSnapshot) -> Vec<&str> {
    snapshot.windows.iter().map(|w| w.title.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn switching_away_and_back_restores_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let (desk, sync, tx) = setup(&config(), dir.path(), &remote, None);

    let script = async {
        send(&tx, open_at("Chart", 276.0, 84.0));
        send(&tx, open_at("News", 400.0, 150.0));
        let s = query(&tx).await;
        assert_eq!(titles(&s), vec!["Chart", "News"]);
        assert_eq!(s.windows[0].z_index, 11);
        assert_eq!(s.windows[1].z_index, 12);

        let chart = s.window("Chart").unwrap().id;
        send(&tx, Command::BringToFront { id: chart });
        assert_eq!(query(&tx).await.window("Chart").unwrap().z_index, 13);

        send(&tx, Command::CreateWorkspace { name: "Second".into() });
        send(&tx, Command::SwitchWorkspace { id: WorkspaceId::new("ws-1") });
        let s = query(&tx).await;
        assert!(s.switching);
        assert!(s.windows.is_empty());
        assert_eq!(s.active_workspace_id, WorkspaceId::new("ws-1"));

        // Nobody acknowledges, so the release deadline ends the switch.
        sleep(Duration::from_millis(150)).await;
        let s = query(&tx).await;
        assert!(!s.switching);
        assert!(s.windows.is_empty());

        send(&tx, Command::SwitchWorkspace { id: WorkspaceId::main() });
        let s = query(&tx).await;
        assert!(s.switching);
        assert_eq!(titles(&s), vec!["News", "Chart"]);
        let chart = s.window("Chart").unwrap();
        assert_eq!(chart.position, Point::new(276.0, 84.0));
        assert_eq!(chart.size, Size::new(300.0, 200.0));
        assert_eq!(s.window("News").unwrap().position, Point::new(400.0, 150.0));

        sleep(Duration::from_millis(350)).await;
        let s = query(&tx).await;
        assert!(!s.switching);
        assert_eq!(s.active_workspace_id, WorkspaceId::main());
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);
}

#[tokio::test(start_paused = true)]
async fn acknowledgements_finish_a_switch_early() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let (mut desk, sync, tx) = setup(&config(), dir.path(), &remote, None);
    let host = ack_host(desk.subscribe(), tx.clone());

    let script = async {
        send(&tx, open_at("Chart", 300.0, 100.0));
        send(&tx, Command::CreateWorkspace { name: "Second".into() });
        send(&tx, Command::SwitchWorkspace { id: WorkspaceId::new("ws-1") });
        let start = Instant::now();
        let s = settle(&tx).await;
        assert!(!s.switching);
        assert_eq!(s.active_workspace_id, WorkspaceId::new("ws-1"));

        send(&tx, Command::SwitchWorkspace { id: WorkspaceId::main() });
        let s = settle(&tx).await;
        assert!(!s.switching);
        assert_eq!(titles(&s), vec!["Chart"]);
        assert!(Instant::now() - start < Duration::from_millis(100));
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), host, script);
}

#[tokio::test(start_paused = true)]
async fn overlapping_switches_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let (desk, sync, tx) = setup(&config(), dir.path(), &remote, None);

    let script = async {
        send(&tx, open_at("Chart", 300.0, 100.0));
        send(&tx, Command::CreateWorkspace { name: "Second".into() });
        send(&tx, Command::SwitchWorkspace { id: WorkspaceId::new("ws-1") });
        send(&tx, Command::SwitchWorkspace { id: WorkspaceId::main() });
        let s = query(&tx).await;
        assert!(s.switching);
        assert_eq!(s.active_workspace_id, WorkspaceId::new("ws-1"));
        assert_eq!(s.rejected.as_deref(), Some("a workspace switch is already in progress"));

        send(&tx, Command::CreateWorkspace { name: "Third".into() });
        assert!(query(&tx).await.rejected.is_some());

        sleep(Duration::from_millis(150)).await;
        let s = query(&tx).await;
        assert!(!s.switching);
        assert_eq!(s.workspaces.len(), 2);
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);
}

#[tokio::test(start_paused = true)]
async fn deleting_the_active_workspace_falls_back_to_main() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let (desk, sync, tx) = setup(&config(), dir.path(), &remote, None);

    let script = async {
        send(&tx, open_at("Chart", 300.0, 100.0));
        send(&tx, Command::CreateWorkspace { name: "Second".into() });
        send(&tx, Command::SwitchWorkspace { id: WorkspaceId::new("ws-1") });
        sleep(Duration::from_millis(150)).await;
        send(&tx, open_at("News", 500.0, 100.0));

        send(&tx, Command::DeleteWorkspace { id: WorkspaceId::new("ws-1") });
        let s = query(&tx).await;
        assert!(s.switching);
        assert_eq!(s.active_workspace_id, WorkspaceId::main());

        sleep(Duration::from_millis(500)).await;
        let s = query(&tx).await;
        assert!(!s.switching);
        assert_eq!(titles(&s), vec!["Chart"]);
        assert_eq!(s.workspaces.len(), 1);
        assert!(s.workspaces[0].is_main);

        let saved = LocalStore::new(dir.path()).load_workspaces().unwrap().unwrap();
        assert_eq!(saved.workspaces.len(), 1);
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);
}

#[tokio::test(start_paused = true)]
async fn main_cannot_be_deleted_or_renamed() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let (desk, sync, tx) = setup(&config(), dir.path(), &remote, None);

    let script = async {
        send(&tx, Command::DeleteWorkspace { id: WorkspaceId::main() });
        assert!(query(&tx).await.rejected.unwrap().contains("cannot be deleted"));

        send(&tx, Command::RenameWorkspace { id: WorkspaceId::main(), name: "Home".into() });
        let s = query(&tx).await;
        assert!(s.rejected.is_some());
        assert_eq!(s.workspaces[0].name, "Main");

        send(&tx, Command::CreateWorkspace { name: "Second".into() });
        send(&tx, Command::RenameWorkspace { id: WorkspaceId::new("ws-1"), name: "Swing".into() });
        let s = query(&tx).await;
        assert_eq!(s.rejected, None);
        assert_eq!(s.workspaces[1].name, "Swing");
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);
}

#[tokio::test(start_paused = true)]
async fn dragging_clamps_and_saves_on_release() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let (desk, sync, tx) = setup(&config(), dir.path(), &remote, None);

    let script = async {
        send(&tx, open_at("Chart", 400.0, 150.0));
        let id = query(&tx).await.windows[0].id;

        send(&tx, Command::PointerDown { id, handle: GestureHandle::Header, x: 410.0, y: 160.0 });
        send(&tx, Command::PointerMove { x: -5000.0, y: -5000.0 });
        let s = query(&tx).await;
        assert_eq!(s.windows[0].position, Point::new(276.0, 84.0));
        assert_eq!(s.windows[0].gesture, Some("dragging"));

        send(&tx, Command::PointerUp { id: Some(id) });
        let s = query(&tx).await;
        assert_eq!(s.windows[0].gesture, None);
        let saved = LocalStore::new(dir.path()).load_layout().unwrap().unwrap();
        assert_eq!(saved[0].position, Point::new(276.0, 84.0));
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);
}

#[tokio::test(start_paused = true)]
async fn bad_open_requests_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let (desk, sync, tx) = setup(&config(), dir.path(), &remote, None);

    let script = async {
        send(&tx, open_at("Broken feed", 300.0, 100.0));
        let s = query(&tx).await;
        assert!(s.windows.is_empty());
        assert!(s.rejected.unwrap().contains("Broken feed"));

        send(&tx, open_at("   ", 300.0, 100.0));
        assert_eq!(
            query(&tx).await.rejected.as_deref(),
            Some("window titles must not be empty")
        );

        send(
            &tx,
            Command::OpenWindow {
                title: "News".into(),
                position: None,
                size: None,
                component_state: Some(ComponentState::Chart {
                    symbol: "AAPL".into(),
                    interval: None,
                }),
            },
        );
        let s = query(&tx).await;
        assert!(s.windows.is_empty());
        assert!(s.rejected.is_some());

        send(&tx, Command::CloseWindow { id: WindowId::new(99) });
        assert_eq!(query(&tx).await.rejected.as_deref(), Some("unknown window: window-99"));
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);
}

#[tokio::test(start_paused = true)]
async fn first_run_staggers_default_windows() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let (desk, sync, tx) = setup(&config_with_defaults(), dir.path(), &remote, None);

    let script = async {
        sleep(Duration::from_millis(10)).await;
        assert_eq!(titles(&query(&tx).await), vec!["Chart"]);
        sleep(Duration::from_millis(150)).await;
        let s = query(&tx).await;
        assert_eq!(titles(&s), vec!["Chart", "News"]);
        assert_eq!(s.window("News").unwrap().position, Point::new(720.0, 100.0));
        assert!(LocalStore::new(dir.path()).is_initialized());
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);
}

#[tokio::test(start_paused = true)]
async fn restart_restores_the_saved_layout() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();

    let (desk, sync, tx) = setup(&config_with_defaults(), dir.path(), &remote, None);
    let first = async {
        sleep(Duration::from_millis(200)).await;
        let s = query(&tx).await;
        let news = s.window("News").unwrap().id;
        send(&tx, Command::CloseWindow { id: news });
        let chart = s.window("Chart").unwrap().id;
        send(
            &tx,
            Command::SetComponentState {
                id: chart,
                state: Some(ComponentState::Chart {
                    symbol: "AAPL".into(),
                    interval: Some("1d".into()),
                }),
            },
        );
        send(&tx, Command::CreateWorkspace { name: "Second".into() });
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), first);

    let saved = LocalStore::new(dir.path()).load_workspaces().unwrap().unwrap();
    assert_eq!(saved.workspaces.len(), 2);
    assert_eq!(
        saved.workspaces[0].window_layouts[0].component_state,
        Some(ComponentState::Chart { symbol: "AAPL".into(), interval: Some("1d".into()) })
    );

    let (desk, sync, tx) = setup(&config_with_defaults(), dir.path(), &remote, None);
    let second = async {
        let s = query(&tx).await;
        assert!(s.switching);
        assert_eq!(titles(&s), vec!["Chart"]);
        assert_eq!(s.window("Chart").unwrap().position, Point::new(300.0, 100.0));
        assert_eq!(s.workspaces.len(), 2);

        sleep(Duration::from_millis(350)).await;
        assert!(!query(&tx).await.switching);
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), second);
}

#[tokio::test(start_paused = true)]
async fn an_emptied_desk_stays_empty() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();

    let (desk, sync, tx) = setup(&config_with_defaults(), dir.path(), &remote, None);
    let first = async {
        sleep(Duration::from_millis(200)).await;
        for window in query(&tx).await.windows {
            send(&tx, Command::CloseWindow { id: window.id });
        }
        assert!(query(&tx).await.windows.is_empty());
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), first);

    let (desk, sync, tx) = setup(&config_with_defaults(), dir.path(), &remote, None);
    let second = async {
        sleep(Duration::from_millis(400)).await;
        assert!(query(&tx).await.windows.is_empty());
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), second);
}

#[tokio::test(start_paused = true)]
async fn sync_waits_for_switches_to_settle() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let config = Config::parse("[sync]\ndebounce_ms = 50").unwrap();
    let (desk, sync, tx) = setup(&config, dir.path(), &remote, Some(user()));

    let script = async {
        send(&tx, open_at("Chart", 300.0, 100.0));
        sleep(Duration::from_millis(100)).await;
        let pushes = remote.pushes(&user());
        assert_eq!(pushes.len(), 1);
        assert!(matches!(&pushes[0], Payload::Layouts(u) if u.workspace_id == WorkspaceId::main()));

        send(&tx, Command::CreateWorkspace { name: "Second".into() });
        send(&tx, Command::SwitchWorkspace { id: WorkspaceId::new("ws-1") });
        sleep(Duration::from_millis(60)).await;
        assert!(query(&tx).await.switching);
        assert_eq!(remote.pushes(&user()).len(), 1);

        sleep(Duration::from_millis(200)).await;
        let pushes = remote.pushes(&user());
        assert_eq!(pushes.len(), 2);
        let Payload::Full(prefs) = &pushes[1] else { panic!("expected a full push") };
        assert_eq!(prefs.state.active_workspace_id, WorkspaceId::new("ws-1"));
        assert_eq!(prefs.state.workspaces.len(), 2);
        assert!(prefs.revision > pushes[0].revision());
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);
}

#[tokio::test(start_paused = true)]
async fn remote_state_replaces_local_windows() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let mut state = WorkspaceState::default();
    state.workspaces[0].window_layouts.push(WorkspaceLayout {
        id: WindowId::new(7),
        kind: WindowKind::News,
        title: "News".into(),
        position: Point::new(300.0, 200.0),
        size: Size::new(500.0, 300.0),
        is_minimized: false,
        z_index: 11,
        component_state: None,
    });
    remote.insert(user(), Preferences { revision: 5, state });
    let (desk, sync, tx) = setup(&config_with_defaults(), dir.path(), &remote, Some(user()));

    let script = async {
        sleep(Duration::from_millis(500)).await;
        let s = query(&tx).await;
        assert!(!s.switching);
        assert_eq!(titles(&s), vec!["News"]);
        assert_eq!(s.windows[0].position, Point::new(300.0, 200.0));
        assert_eq!(remote.pull_count(&user()), 1);

        sleep(Duration::from_millis(2500)).await;
        let pushes = remote.pushes(&user());
        assert!(!pushes.is_empty());
        assert!(pushes.iter().all(|p| p.revision() > 5));
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);
}

#[tokio::test(start_paused = true)]
async fn shutdown_sends_an_unload_beacon() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryPreferenceStore::new();
    let (desk, sync, tx) = setup(&config(), dir.path(), &remote, Some(user()));

    let script = async {
        send(&tx, open_at("Chart", 300.0, 100.0));
        query(&tx).await;
        tx.send(Event::Shutdown);
    };
    tokio::join!(desk.run(), sync.run(), script);

    let beacons = remote.beacons(&user());
    assert_eq!(beacons.len(), 1);
    assert_eq!(beacons[0].state.workspaces[0].window_layouts[0].title, "Chart");
    assert!(remote.pushes(&user()).is_empty());
}
