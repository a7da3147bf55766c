//! Publish against an in-memory host.

mod common;

use blockattach::filesystem::Mounter;
use blockattach::node::{AccessMode, PublishRequest, VolumeCapability, publish};
use blockattach_common::{AttachResult, ErrorCode};
use common::{FakeHost, Node, block_request, fs_request, record};
use test_log::test;

fn run(host: &FakeHost, node: &Node, req: &PublishRequest) -> AttachResult<()> {
    publish(host, req, &node.private_dir(), &node.device())
}

#[test]
fn filesystem_publish_formats_and_binds() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");

    run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap();

    let private = host.mounted_at(&node.private_mount()).unwrap();
    assert_eq!(private.device, "/dev/null");
    assert!(private.has_option("rw"));
    assert!(node.private_mount().is_dir());

    let bound = host.mounted_at(&target).unwrap();
    assert_eq!(bound.device, "/dev/null");
    assert!(bound.has_option("rw"));

    assert_eq!(
        host.log(),
        vec![
            "mkfs ext4".to_string(),
            format!("mount ext4 {}", node.private_mount().display()),
            format!("bind {} {}", node.private_mount().display(), target.display()),
        ]
    );
}

#[test]
fn publish_is_idempotent() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");
    let req = fs_request(&target, AccessMode::SingleNodeWriter);

    run(&host, &node, &req).unwrap();
    let before = host.snapshot();
    let ops = host.log().len();

    run(&host, &node, &req).unwrap();
    assert_eq!(host.snapshot(), before);
    assert_eq!(host.log().len(), ops);
}

#[test]
fn block_publish_binds_device_node() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.file_target("tgt");

    run(&host, &node, &block_request(&target)).unwrap();

    assert!(node.private_mount().is_file());
    let private = host.mounted_at(&node.private_mount()).unwrap();
    assert_eq!(private.fs_type, "devtmpfs");
    assert_eq!(private.device, "udev");
    assert_eq!(private.source, std::path::PathBuf::from("/dev/null"));

    let bound = host.mounted_at(&target).unwrap();
    assert_eq!(bound.fs_type, "devtmpfs");
    assert_eq!(bound.source, std::path::PathBuf::from("/dev/null"));
    assert!(!host.log().iter().any(|op| op.starts_with("mkfs")));

    run(&host, &node, &block_request(&target)).unwrap();
    assert_eq!(host.snapshot().len(), 2);
}

#[test]
fn read_only_publish_never_formats() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");

    run(&host, &node, &fs_request(&target, AccessMode::SingleNodeReaderOnly)).unwrap();

    assert!(host.mounted_at(&node.private_mount()).unwrap().has_option("ro"));
    assert!(host.mounted_at(&target).unwrap().has_option("ro"));
    assert!(!host.log().iter().any(|op| op.starts_with("mkfs")));
}

#[test]
fn targets_share_one_private_mount() {
    let node = Node::new();
    let host = FakeHost::new();
    let first = node.dir_target("tgt1");
    let second = node.dir_target("tgt2");

    run(&host, &node, &fs_request(&first, AccessMode::SingleNodeWriter)).unwrap();
    run(&host, &node, &fs_request(&second, AccessMode::SingleNodeWriter)).unwrap();

    let log = host.log();
    assert_eq!(log.iter().filter(|op| op.starts_with("mkfs")).count(), 1);
    assert_eq!(log.iter().filter(|op| op.starts_with("mount")).count(), 1);
    assert!(host.mounted_at(&first).is_some());
    assert!(host.mounted_at(&second).is_some());
}

#[test]
fn conflicting_access_mode_is_invalid_argument() {
    let node = Node::new();
    let host = FakeHost::new();
    let first = node.dir_target("tgt1");
    let second = node.dir_target("tgt2");

    run(&host, &node, &fs_request(&first, AccessMode::SingleNodeWriter)).unwrap();
    let err = run(&host, &node, &fs_request(&second, AccessMode::SingleNodeReaderOnly)).unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert!(err.to_string().contains("access mode conflicts"));
    assert!(host.mounted_at(&second).is_none());
}

#[test]
fn reader_after_writer_on_same_target_is_invalid_argument() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");

    run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap();
    let before = host.snapshot();

    let err = run(&host, &node, &fs_request(&target, AccessMode::SingleNodeReaderOnly)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(host.snapshot(), before);
    assert!(host.mounted_at(&target).unwrap().has_option("rw"));
}

#[test]
fn target_published_with_other_permission_is_internal() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");

    run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap();
    host.unmount(&target).unwrap();
    host.preload(record(&target, "/dev/null", &["ro"]));

    let err = run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(err.to_string().contains("different options"));
}

#[test]
fn read_only_block_is_rejected_before_touching_host() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.file_target("tgt");

    let mut req = block_request(&target);
    req.readonly = true;
    let err = run(&host, &node, &req).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    req.readonly = false;
    req.volume_capability = Some(VolumeCapability::block(AccessMode::SingleNodeReaderOnly));
    let err = run(&host, &node, &req).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert!(host.log().is_empty());
}

#[test]
fn missing_target_is_failed_precondition() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.path().join("absent");

    let err = run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);
    assert!(err.to_string().contains("not pre-created"));
}

#[test]
fn wrong_target_kind_is_failed_precondition() {
    let node = Node::new();
    let host = FakeHost::new();

    let dir = node.dir_target("tgt-dir");
    let err = run(&host, &node, &block_request(&dir)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);

    let file = node.file_target("tgt-file");
    let err = run(&host, &node, &fs_request(&file, AccessMode::SingleNodeWriter)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);
    assert!(host.log().is_empty());
}

#[test]
fn unresolvable_device_is_internal() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");

    let err = publish(
        &host,
        &fs_request(&target, AccessMode::SingleNodeWriter),
        &node.private_dir(),
        &node.path().join("dev/missing"),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(err.to_string().contains("error getting block device for volume: vol-1"));

    std::fs::write(node.path().join("dev/plain"), b"").unwrap();
    let err = publish(
        &host,
        &fs_request(&target, AccessMode::SingleNodeWriter),
        &node.private_dir(),
        &node.path().join("dev/plain"),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
}

#[test]
fn missing_private_dir_is_internal() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");

    let err = publish(
        &host,
        &fs_request(&target, AccessMode::SingleNodeWriter),
        &node.path().join("nope"),
        &node.device(),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(err.to_string().contains("not pre-created"));
}

#[test]
fn device_mounted_elsewhere_is_internal() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");
    host.preload(record(&node.path().join("elsewhere"), "/dev/null", &["rw"]));

    let err = run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(err.to_string().contains("mounted elsewhere"));
    assert!(host.log().is_empty());
}

#[test]
fn private_mount_point_in_use_by_other_device_is_internal() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");
    std::fs::create_dir(node.private_mount()).unwrap();
    host.preload(record(&node.private_mount(), "/dev/zero", &["rw"]));

    let err = run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(err.to_string().contains("already in use"));
}

#[test]
fn leftover_private_mount_point_is_reused() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");
    std::fs::create_dir(node.private_mount()).unwrap();

    run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap();
    assert!(host.mounted_at(&node.private_mount()).is_some());
}

#[test]
fn failed_private_mount_is_internal() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");
    host.fail("mkfs");

    let err = run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(err.to_string().contains("error performing private mount"));
}

#[test]
fn unreadable_mount_table_is_internal() {
    let node = Node::new();
    let host = FakeHost::new();
    let target = node.dir_target("tgt");
    host.fail("mounts");

    let err = run(&host, &node, &fs_request(&target, AccessMode::SingleNodeWriter)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(err.to_string().contains("could not reliably determine"));
}

#[test]
fn other_devices_are_independent() {
    let node = Node::new();
    let host = FakeHost::new();
    let first = node.dir_target("tgt1");
    let second = node.dir_target("tgt2");

    run(&host, &node, &fs_request(&first, AccessMode::SingleNodeWriter)).unwrap();
    publish(
        &host,
        &fs_request(&second, AccessMode::SingleNodeReaderOnly),
        &node.private_dir(),
        &node.other_device(),
    )
    .unwrap();

    assert_eq!(host.mounted_at(&second).unwrap().device, "/dev/zero");
    assert!(node.private_dir().join("sdc").is_dir());
}
