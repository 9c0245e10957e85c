//! Integration tests for strandd
//!
//! Verify daemon lifecycle and client-server communication over the
//! framed JSON control socket.

use std::fs;
use std::time::Duration;

use tokio::net::UnixStream;
use uuid::Uuid;

use strand_config::testing::TestEnvironment;
use strand_config::{Config, DriveEntry};
use strandd::frame::{read_message, write_message};
use strandd::protocol::{Request, Response};

async fn send(stream: &mut UnixStream, request: Request) -> Response {
    write_message(stream, &request).await.unwrap();
    read_message(stream)
        .await
        .unwrap()
        .expect("daemon closed the connection")
}

async fn start_daemon(env: &TestEnvironment) -> (Uuid, Uuid, UnixStream) {
    let src_drive = Uuid::new_v4();
    let dst_drive = Uuid::new_v4();

    let mut config = Config::default();
    config.drives = vec![
        DriveEntry {
            uuid: src_drive,
            path: env.src_root.clone(),
            label: Some("src".into()),
        },
        DriveEntry {
            uuid: dst_drive,
            path: env.dst_root.clone(),
            label: Some("dst".into()),
        },
    ];
    config.daemon.socket = env.socket_path.clone();
    // Scans are driven explicitly in tests
    config.watch.enabled = false;

    tokio::spawn(strandd::run_daemon(config));

    for _ in 0..100 {
        if env.socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stream = UnixStream::connect(&env.socket_path).await.unwrap();
    (src_drive, dst_drive, stream)
}

#[tokio::test]
async fn test_handshake_and_status() {
    let env = TestEnvironment::new();
    fs::write(env.src_root.join("hello.txt"), b"hi").unwrap();
    let (_, _, mut stream) = start_daemon(&env).await;

    match send(
        &mut stream,
        Request::Handshake {
            client_version: "1.0.0".into(),
        },
    )
    .await
    {
        Response::HandshakeAck { server_version } => assert!(!server_version.is_empty()),
        other => panic!("expected HandshakeAck, got {:?}", other),
    }

    match send(&mut stream, Request::Status).await {
        Response::StatusAck { drives, tasks, nodes } => {
            assert_eq!(drives, 2);
            assert_eq!(tasks, 0);
            // both roots plus the seeded file
            assert_eq!(nodes, 3);
        }
        other => panic!("expected StatusAck, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lookup_and_classify() {
    let env = TestEnvironment::new();
    fs::write(env.src_root.join("note.txt"), b"readable notes\n").unwrap();
    let (_, _, mut stream) = start_daemon(&env).await;

    let node = match send(
        &mut stream,
        Request::FindByName {
            name: "note.txt".into(),
            parent: None,
        },
    )
    .await
    {
        Response::Node { node } => node.expect("note.txt should be mirrored"),
        other => panic!("expected Node, got {:?}", other),
    };

    match send(&mut stream, Request::Lookup { uuid: node.uuid }).await {
        Response::Node { node: found } => {
            assert_eq!(found.unwrap().name, "note.txt");
        }
        other => panic!("expected Node, got {:?}", other),
    }

    match send(&mut stream, Request::Classify { uuid: node.uuid }).await {
        Response::Classified { magic } => assert_eq!(magic.as_deref(), Some("text")),
        other => panic!("expected Classified, got {:?}", other),
    }
}

#[tokio::test]
async fn test_xcopy_over_the_wire() {
    let env = TestEnvironment::new();
    fs::create_dir(env.src_root.join("album")).unwrap();
    fs::write(env.src_root.join("album/track.txt"), b"la la la").unwrap();
    let (src_drive, dst_drive, mut stream) = start_daemon(&env).await;

    let task = match send(
        &mut stream,
        Request::XcopyCreate {
            kind: strand_xcopy::XcopyKind::Copy,
            src: strand_xcopy::Location::Vfs {
                drive: src_drive,
                dir: src_drive,
            },
            dst: strand_xcopy::Location::Vfs {
                drive: dst_drive,
                dir: dst_drive,
            },
            entries: vec!["album".into()],
            policies: Default::default(),
        },
    )
    .await
    {
        Response::TaskCreated { task } => task,
        other => panic!("expected TaskCreated, got {:?}", other),
    };

    // Poll the view until the task settles
    let mut finished = false;
    for _ in 0..200 {
        match send(&mut stream, Request::XcopyView { task }).await {
            Response::TaskView { view } => {
                if view["finished"] == true {
                    finished = true;
                    break;
                }
            }
            other => panic!("expected TaskView, got {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(finished, "copy task did not settle");

    assert_eq!(
        fs::read(env.dst_root.join("album/track.txt")).unwrap(),
        b"la la la"
    );

    // After an explicit re-scan the replica is addressable
    match send(&mut stream, Request::Scan { drive: dst_drive }).await {
        Response::Done => {}
        other => panic!("expected Done, got {:?}", other),
    }
    match send(
        &mut stream,
        Request::FindByName {
            name: "track.txt".into(),
            parent: Some("album".into()),
        },
    )
    .await
    {
        Response::Node { node } => assert!(node.is_some()),
        other => panic!("expected Node, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rename_and_remove_over_the_wire() {
    let env = TestEnvironment::new();
    fs::write(env.src_root.join("old-name.txt"), b"data").unwrap();
    let (_, _, mut stream) = start_daemon(&env).await;

    let node = match send(
        &mut stream,
        Request::FindByName {
            name: "old-name.txt".into(),
            parent: None,
        },
    )
    .await
    {
        Response::Node { node } => node.unwrap(),
        other => panic!("expected Node, got {:?}", other),
    };

    match send(
        &mut stream,
        Request::Rename {
            uuid: node.uuid,
            new_name: "new-name.txt".into(),
            policy: None,
        },
    )
    .await
    {
        Response::Node { node: renamed } => {
            let renamed = renamed.expect("renamed node still addressable");
            assert_eq!(renamed.uuid, node.uuid);
            assert_eq!(renamed.name, "new-name.txt");
        }
        other => panic!("expected Node, got {:?}", other),
    }
    assert!(env.src_root.join("new-name.txt").exists());

    match send(&mut stream, Request::Remove { uuid: node.uuid }).await {
        Response::Done => {}
        other => panic!("expected Done, got {:?}", other),
    }
    assert!(!env.src_root.join("new-name.txt").exists());

    match send(&mut stream, Request::Lookup { uuid: node.uuid }).await {
        Response::Node { node } => assert!(node.is_none()),
        other => panic!("expected Node, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_task_is_an_error() {
    let env = TestEnvironment::new();
    let (_, _, mut stream) = start_daemon(&env).await;

    match send(
        &mut stream,
        Request::XcopyView {
            task: Uuid::new_v4(),
        },
    )
    .await
    {
        Response::Error { message } => assert!(message.contains("unknown task")),
        other => panic!("expected Error, got {:?}", other),
    }
}
