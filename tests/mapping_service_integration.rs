//! Integration tests for the mapping service client
//!
//! These run against the simulated host and check the table semantics callers rely on.

use bindbox::mapping::{BatchConfig, MappingEntry, MappingFlags, Principal};
use bindbox::scope::{ScopeController, ScopeOptions};
use bindbox::service::{MappingClient, MappingSelector, QueryOutcome, QuerySelector};
use bindbox::testing::SimulatedHost;
use bindbox::{BindError, ErrorClass};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn client(host: &SimulatedHost) -> MappingClient {
    MappingClient::new(Arc::new(host.clone()))
}

fn controller(host: &SimulatedHost) -> ScopeController {
    ScopeController::new(Arc::new(host.clone()))
}

#[test]
fn test_attach_is_idempotent() {
    let host = SimulatedHost::new();
    let client = client(&host);

    assert!(!client.attach(Path::new("D:\\")).unwrap().already_attached);
    assert!(client.attach(Path::new("D:\\")).unwrap().already_attached);
    assert!(host.is_attached("D:\\anything"));
}

#[test]
fn test_install_then_query_scope() {
    let host = SimulatedHost::new();
    let client = client(&host);
    let controller = controller(&host);
    let mut scope = controller.create_scope().unwrap();
    controller.configure(&mut scope, ScopeOptions::launch()).unwrap();

    client
        .install(
            MappingSelector::Scope(&scope),
            Path::new("D:\\virt"),
            Path::new("D:\\phys"),
            MappingFlags::READ_ONLY,
            &[],
        )
        .unwrap();

    let snapshot = client.snapshot_scope(&scope).unwrap();
    assert_eq!(snapshot.len(), 1);
    let entry = &snapshot.entries[0];
    assert_eq!(entry.virtual_root, PathBuf::from("D:\\virt"));
    assert_eq!(entry.targets, vec![PathBuf::from("D:\\phys")]);
    assert!(entry.flags.contains(MappingFlags::READ_ONLY));

    // Scope-local mappings never leak into the global table
    assert!(host.global_entries().is_empty());
}

#[test]
fn test_remove_then_query() {
    let host = SimulatedHost::new();
    let client = client(&host);
    let controller = controller(&host);
    let mut scope = controller.create_scope().unwrap();
    controller.configure(&mut scope, ScopeOptions::launch()).unwrap();
    let root = Path::new("D:\\virt");

    let selector = MappingSelector::Scope(&scope);
    client
        .install(selector, root, Path::new("D:\\phys"), MappingFlags::empty(), &[])
        .unwrap();
    client.remove(MappingSelector::Scope(&scope), root).unwrap();

    assert!(!client.snapshot_scope(&scope).unwrap().contains(root));
    let second = client.remove(MappingSelector::Scope(&scope), root);
    assert!(matches!(second, Err(BindError::NotFound(_))));
}

#[test]
fn test_merged_targets_accumulate_and_alias_resolves_last() {
    let host = SimulatedHost::new();
    let client = client(&host);
    for (dir, contents) in [("D:\\a", "a"), ("D:\\b", "b"), ("D:\\c", "c")] {
        host.add_file(format!("{}\\shared.txt", dir), contents);
        client
            .install(
                MappingSelector::Global,
                Path::new("D:\\merged"),
                Path::new(dir),
                MappingFlags::MERGED,
                &[],
            )
            .unwrap();
    }

    let listing = client.query_all(QuerySelector::Volume(Path::new("D:\\"))).unwrap();
    let merged = listing.find(Path::new("D:\\merged")).unwrap();
    assert_eq!(
        merged.targets,
        vec![PathBuf::from("D:\\a"), PathBuf::from("D:\\b"), PathBuf::from("D:\\c")]
    );

    client
        .install(
            MappingSelector::Global,
            Path::new("D:\\alias"),
            Path::new("D:\\merged"),
            MappingFlags::empty(),
            &[],
        )
        .unwrap();
    assert_eq!(host.read_file("D:\\alias\\shared.txt").unwrap(), b"c");
}

#[test]
fn test_single_target_merge_rejects_second_target() {
    let host = SimulatedHost::new();
    let client = client(&host);
    let root = Path::new("D:\\single");
    let flags = MappingFlags::MERGED | MappingFlags::SINGLE_TARGET_ONLY;

    client
        .install(MappingSelector::Global, root, Path::new("D:\\a"), flags, &[])
        .unwrap();
    let second = client.install(MappingSelector::Global, root, Path::new("D:\\b"), flags, &[]);
    assert!(matches!(second, Err(BindError::InvalidParameter(_))));

    // Re-installing the existing target is accepted and changes nothing
    client
        .install(MappingSelector::Global, root, Path::new("D:\\a"), flags, &[])
        .unwrap();

    let listing = client.query_all(QuerySelector::Volume(Path::new("D:\\"))).unwrap();
    let entry = listing.find(root).unwrap();
    assert_eq!(entry.targets, vec![PathBuf::from("D:\\a")]);
    assert!(entry.flags.contains(MappingFlags::SINGLE_TARGET_ONLY));
}

#[test]
fn test_merge_policy_mismatch_is_rejected() {
    let host = SimulatedHost::new();
    let client = client(&host);
    let root = Path::new("D:\\virt");

    client
        .install(MappingSelector::Global, root, Path::new("D:\\one"), MappingFlags::empty(), &[])
        .unwrap();
    let merged = MappingFlags::MERGED;
    let result = client.install(MappingSelector::Global, root, Path::new("D:\\two"), merged, &[]);
    assert!(matches!(result, Err(BindError::AlreadyMapped(_))));

    // Non-merged re-install replaces the target
    client
        .install(MappingSelector::Global, root, Path::new("D:\\three"), MappingFlags::empty(), &[])
        .unwrap();
    assert_eq!(host.global_entries()[0].targets, vec![PathBuf::from("D:\\three")]);
}

#[test]
fn test_size_probe_then_fetch() {
    let host = SimulatedHost::new();
    let client = client(&host);
    let controller = controller(&host);
    let mut scope = controller.create_scope().unwrap();
    controller.configure(&mut scope, ScopeOptions::launch()).unwrap();
    client
        .install(
            MappingSelector::Scope(&scope),
            Path::new("D:\\virt"),
            Path::new("D:\\phys"),
            MappingFlags::empty(),
            &[],
        )
        .unwrap();

    let required = match client.query(QuerySelector::Scope(&scope), 0).unwrap() {
        QueryOutcome::NeedsCapacity(n) => n,
        QueryOutcome::Ready(_) => panic!("zero capacity cannot hold a listing"),
    };
    assert!(required > 0);

    match client.query(QuerySelector::Scope(&scope), required as usize).unwrap() {
        QueryOutcome::Ready(result) => assert_eq!(result.len(), 1),
        QueryOutcome::NeedsCapacity(n) => panic!("still short by {} bytes", n),
    }

    // A short but non-empty buffer gets the in-band header
    match client.query(QuerySelector::Scope(&scope), 16).unwrap() {
        QueryOutcome::NeedsCapacity(n) => assert_eq!(n, required),
        QueryOutcome::Ready(_) => panic!("16 bytes cannot hold a listing"),
    }
}

#[test]
fn test_require_parent_mapped() {
    let host = SimulatedHost::new();
    let client = client(&host);

    let orphan = client.install(
        MappingSelector::Global,
        Path::new("D:\\parent\\child"),
        Path::new("D:\\phys"),
        MappingFlags::REQUIRE_PARENT_MAPPED,
        &[],
    );
    assert!(matches!(orphan, Err(BindError::PathNotFound(_))));

    client
        .install(
            MappingSelector::Global,
            Path::new("D:\\parent"),
            Path::new("D:\\p"),
            MappingFlags::empty(),
            &[],
        )
        .unwrap();
    client
        .install(
            MappingSelector::Global,
            Path::new("D:\\parent\\child"),
            Path::new("D:\\phys"),
            MappingFlags::REQUIRE_PARENT_MAPPED,
            &[],
        )
        .unwrap();
}

#[test]
fn test_exceptions_stay_unredirected() {
    let host = SimulatedHost::new();
    let client = client(&host);
    host.add_file("D:\\virt\\keep\\local.txt", "local");
    host.add_file("D:\\phys\\keep\\local.txt", "redirected");
    host.add_file("D:\\phys\\other.txt", "other");

    client
        .install(
            MappingSelector::Global,
            Path::new("D:\\virt"),
            Path::new("D:\\phys"),
            MappingFlags::empty(),
            &[PathBuf::from("D:\\virt\\keep")],
        )
        .unwrap();

    assert_eq!(host.read_file("D:\\virt\\keep\\local.txt").unwrap(), b"local");
    assert_eq!(host.read_file("D:\\virt\\other.txt").unwrap(), b"other");

    let outside = client.install(
        MappingSelector::Global,
        Path::new("D:\\virt2"),
        Path::new("D:\\phys"),
        MappingFlags::empty(),
        &[PathBuf::from("D:\\elsewhere")],
    );
    assert!(matches!(outside, Err(BindError::InvalidParameter(_))));
}

#[test]
fn test_flag_validation() {
    let host = SimulatedHost::new();
    let client = client(&host);

    let unsafe_share = client.install(
        MappingSelector::Global,
        Path::new("D:\\virt"),
        Path::new("D:\\phys"),
        MappingFlags::SKIP_SHARING_CHECK,
        &[],
    );
    assert!(matches!(unsafe_share, Err(BindError::InvalidParameter(_))));

    let local_without_scope = client.install(
        MappingSelector::Global,
        Path::new("D:\\virt"),
        Path::new("D:\\phys"),
        MappingFlags::USE_SCOPE_LOCAL_TABLE,
        &[],
    );
    assert!(matches!(local_without_scope, Err(BindError::InvalidParameter(_))));

    let bad_path = client.install(
        MappingSelector::Global,
        Path::new("D:\\virt\\..\\escape"),
        Path::new("D:\\phys"),
        MappingFlags::empty(),
        &[],
    );
    assert!(matches!(bad_path, Err(BindError::InvalidParameter(_))));
}

#[test]
fn test_unconfigured_scope_has_no_table() {
    let host = SimulatedHost::new();
    let client = client(&host);
    let controller = controller(&host);
    let scope = controller.create_scope().unwrap();

    let result = client.install(
        MappingSelector::Scope(&scope),
        Path::new("D:\\virt"),
        Path::new("D:\\phys"),
        MappingFlags::empty(),
        &[],
    );
    assert!(matches!(result, Err(BindError::InvalidParameter(_))));
}

#[test]
fn test_principal_tables_are_separate() {
    let host = SimulatedHost::new();
    let client = client(&host);
    let alice: Principal = "S-1-5-21-1-2-3-1001".parse().unwrap();
    let bob: Principal = "S-1-5-21-1-2-3-1002".parse().unwrap();

    client
        .install(
            MappingSelector::Principal(&alice),
            Path::new("D:\\home"),
            Path::new("D:\\users\\alice"),
            MappingFlags::empty(),
            &[],
        )
        .unwrap();

    let mine = client.query_all(QuerySelector::Principal(&alice)).unwrap();
    assert!(mine.contains(Path::new("D:\\home")));
    assert!(client.query_all(QuerySelector::Principal(&bob)).unwrap().is_empty());
    assert!(host.global_entries().is_empty());

    client.remove(MappingSelector::Principal(&alice), Path::new("D:\\home")).unwrap();
    assert!(client.query_all(QuerySelector::Principal(&alice)).unwrap().is_empty());
}

#[test]
fn test_batch_install_is_all_or_nothing() {
    let host = SimulatedHost::new();
    let client = client(&host);

    let entries = vec![
        MappingEntry::new("D:\\one", "D:\\phys1", MappingFlags::empty()),
        MappingEntry::new("E:\\two", "E:\\phys2", MappingFlags::READ_ONLY),
    ];
    let batch = client.generate_batch(&BatchConfig::from_entries(&entries).unwrap()).unwrap();
    assert!(!batch.is_empty());
    client
        .install_batch(
            MappingSelector::Global,
            &batch,
            MappingFlags::empty(),
            &[PathBuf::from("D:\\"), PathBuf::from("E:\\")],
        )
        .unwrap();
    assert_eq!(host.global_entries().len(), 2);
    assert!(host.is_attached("E:\\"));

    // Second line conflicts with the existing non-merged root: nothing from the batch lands
    let conflicting = vec![
        MappingEntry::new("D:\\three", "D:\\phys3", MappingFlags::empty()),
        MappingEntry::new("D:\\one", "D:\\phys4", MappingFlags::MERGED),
    ];
    let batch = client.generate_batch(&BatchConfig::from_entries(&conflicting).unwrap()).unwrap();
    let result = client.install_batch(MappingSelector::Global, &batch, MappingFlags::empty(), &[]);
    assert!(matches!(result, Err(BindError::AlreadyMapped(_))));
    let roots: Vec<PathBuf> = host.global_entries().into_iter().map(|e| e.virtual_root).collect();
    assert_eq!(roots, vec![PathBuf::from("D:\\one"), PathBuf::from("E:\\two")]);
}

#[test]
fn test_malformed_batch_is_invalid_config() {
    let host = SimulatedHost::new();
    let client = client(&host);

    let result = client.generate_batch(&BatchConfig::from_text("D:\\only-a-root").unwrap());
    match result {
        Err(e @ BindError::InvalidConfig(_)) => assert_eq!(e.class(), ErrorClass::Fatal),
        other => panic!("expected InvalidConfig, got {:?}", other),
    }
}
