use std::sync::Arc;

use bytes::Bytes;
use content_vault::access::{Actor, Role};
use content_vault::audit::MemoryAuditSink;
use content_vault::keys;
use content_vault::object_store::{LocalStore, ObjectStore};
use content_vault::storage::models::{ChangeSetStatus, OperationKind};
use content_vault::storage::{ChangeSetFilter, Database};
use content_vault::vault::{PublicRef, ReviewDecision, Vault, VaultError};

struct Harness {
    _dir: tempfile::TempDir,
    vault: Vault,
    store: Arc<LocalStore>,
    audit: Arc<MemoryAuditSink>,
}

fn harness() -> Harness {
    harness_with(false)
}

fn harness_with(strict_merge: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let store = Arc::new(LocalStore::new(dir.path().join("files")).unwrap());
    let audit = Arc::new(MemoryAuditSink::default());
    let vault = Vault::new(db, store.clone(), audit.clone()).with_strict_merge(strict_merge);
    Harness {
        _dir: dir,
        vault,
        store,
        audit,
    }
}

fn alice() -> Actor {
    Actor::new("alice", Role::Editor)
}

fn bob() -> Actor {
    Actor::new("bob", Role::Editor)
}

fn carol() -> Actor {
    Actor::new("carol", Role::Approver)
}

fn admin() -> Actor {
    Actor::new("root", Role::Admin)
}

/// Submit, approve (as carol) and merge (as the author) a change set.
async fn land(h: &Harness, author: &Actor, id: u64) {
    h.vault.submit(author, id).unwrap();
    h.vault
        .review(&carol(), id, ReviewDecision::Approve, None)
        .unwrap();
    h.vault.merge(author, id).await.unwrap();
}

/// Stage content in a fresh change set and merge it.
async fn commit(h: &Harness, author: &Actor, path: &str, content: &str) -> u64 {
    let change_set = h.vault.create_change_set(author, "Commit", "").unwrap();
    h.vault
        .add_operation(
            author,
            change_set.id,
            path,
            if h.vault.db().latest_version(path).unwrap().is_some_and(|v| !v.is_tombstone) {
                OperationKind::Edit
            } else {
                OperationKind::Create
            },
            Some(Bytes::from(content.to_string())),
        )
        .await
        .unwrap();
    land(h, author, change_set.id).await;
    change_set.id
}

// ============================================================================
// Round trip and ledger effects
// ============================================================================

#[tokio::test]
async fn test_create_merge_round_trip() {
    let h = harness();
    let content = "# Readme\n\nHello.\n";

    let id = commit(&h, &alice(), "docs/readme.md", content).await;

    let file = h.vault.get_content("docs/readme.md", None).await.unwrap();
    assert_eq!(file.content, Bytes::from(content));
    assert_eq!(file.version.version, 1);
    assert_eq!(file.version.content_hash, keys::content_hash(content.as_bytes()));
    assert_eq!(file.version.message, format!("CR #{id}: Commit"));
    assert_eq!(file.version.author, "alice");
    assert!(file.version.blob_ref.starts_with("_versions/"));

    // Canonical key holds the same bytes
    assert_eq!(h.store.get("docs/readme.md").await.unwrap(), Bytes::from(content));
}

#[tokio::test]
async fn test_staged_content_is_invisible_until_merge() {
    let h = harness();
    let change_set = h.vault.create_change_set(&alice(), "Draft", "").unwrap();
    h.vault
        .add_operation(
            &alice(),
            change_set.id,
            "draft.txt",
            OperationKind::Create,
            Some(Bytes::from("wip")),
        )
        .await
        .unwrap();

    assert!(h.vault.db().latest_version("draft.txt").unwrap().is_none());
    assert!(!h.store.exists("draft.txt").await.unwrap());
    assert!(matches!(
        h.vault.get_content("draft.txt", None).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_scenario_edit_by_second_user() {
    let h = harness();
    commit(&h, &alice(), "docs/readme.md", "v1 by alice").await;

    let cs = h.vault.create_change_set(&bob(), "Improve readme", "").unwrap();
    let staged = h
        .vault
        .add_operation(
            &bob(),
            cs.id,
            "docs/readme.md",
            OperationKind::Edit,
            Some(Bytes::from("v2 by bob")),
        )
        .await
        .unwrap();
    let op = staged.operations[0].clone();
    assert_eq!(op.base_version, Some(1));
    let staged_key = op.staged_key.clone().unwrap();
    assert!(h.store.exists(&staged_key).await.unwrap());

    h.vault.submit(&bob(), cs.id).unwrap();
    h.vault
        .review(&carol(), cs.id, ReviewDecision::Approve, Some("ok"))
        .unwrap();
    let merged = h.vault.merge(&bob(), cs.id).await.unwrap();

    assert_eq!(merged.status, ChangeSetStatus::Merged);
    assert!(merged.merged_at.is_some());
    assert_eq!(merged.operations[0].committed_version, Some(2));

    let latest = h.vault.db().latest_version("docs/readme.md").unwrap().unwrap();
    assert_eq!(latest.version, 2);
    assert_eq!(latest.author, "bob");
    let file = h.vault.get_content("docs/readme.md", None).await.unwrap();
    assert_eq!(file.content, Bytes::from("v2 by bob"));

    // Staged blob is gone once merged
    assert!(!h.store.exists(&staged_key).await.unwrap());
    assert!(h.store.get(&staged_key).await.is_err());

    // The old version is still readable
    let v1 = h.vault.get_content("docs/readme.md", Some(1)).await.unwrap();
    assert_eq!(v1.content, Bytes::from("v1 by alice"));
}

#[tokio::test]
async fn test_delete_writes_tombstone_and_recreate_continues_numbering() {
    let h = harness();
    commit(&h, &alice(), "old.txt", "content").await;

    let cs = h.vault.create_change_set(&alice(), "Remove", "").unwrap();
    h.vault
        .add_operation(&alice(), cs.id, "old.txt", OperationKind::Delete, None)
        .await
        .unwrap();
    land(&h, &alice(), cs.id).await;

    let latest = h.vault.db().latest_version("old.txt").unwrap().unwrap();
    assert!(latest.is_tombstone);
    assert_eq!(latest.version, 2);
    assert_eq!(latest.message, format!("CR #{}: Delete old.txt", cs.id));
    assert!(!h.store.exists("old.txt").await.unwrap());
    assert!(matches!(
        h.vault.get_content("old.txt", None).await,
        Err(VaultError::Gone(_))
    ));
    assert!(h.vault.list_current_files("").unwrap().is_empty());

    commit(&h, &bob(), "old.txt", "reborn").await;
    let latest = h.vault.db().latest_version("old.txt").unwrap().unwrap();
    assert_eq!(latest.version, 3);
    assert!(!latest.is_tombstone);
}

#[tokio::test]
async fn test_merge_applies_operations_in_order() {
    let h = harness();
    commit(&h, &alice(), "a.txt", "a").await;

    let cs = h.vault.create_change_set(&alice(), "Batch", "").unwrap();
    for (path, kind, content) in [
        ("a.txt", OperationKind::Edit, Some("a2")),
        ("b.txt", OperationKind::Create, Some("b")),
        ("c.txt", OperationKind::Create, Some("c")),
    ] {
        h.vault
            .add_operation(&alice(), cs.id, path, kind, content.map(Bytes::from))
            .await
            .unwrap();
    }
    land(&h, &alice(), cs.id).await;

    let files = h.vault.list_current_files("").unwrap();
    let summary: Vec<_> = files
        .iter()
        .map(|f| (f.version.file_path.as_str(), f.version.version))
        .collect();
    assert_eq!(summary, vec![("a.txt", 2), ("b.txt", 1), ("c.txt", 1)]);
    assert!(h
        .audit
        .events()
        .iter()
        .any(|e| e.action == "cr.merge" && e.details["file_count"] == 3));
}

// ============================================================================
// State machine
// ============================================================================

#[tokio::test]
async fn test_merge_requires_approval() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Not yet", "").unwrap();
    h.vault
        .add_operation(&alice(), cs.id, "x.txt", OperationKind::Create, Some(Bytes::from("x")))
        .await
        .unwrap();

    assert!(matches!(
        h.vault.merge(&alice(), cs.id).await,
        Err(VaultError::Conflict(_))
    ));

    h.vault.submit(&alice(), cs.id).unwrap();
    assert!(matches!(
        h.vault.merge(&alice(), cs.id).await,
        Err(VaultError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_submit_requires_operations() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Empty", "").unwrap();

    assert!(matches!(
        h.vault.submit(&alice(), cs.id),
        Err(VaultError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_self_review_only_for_admins() {
    let h = harness();
    let approver = carol();
    let cs = h.vault.create_change_set(&approver, "Mine", "").unwrap();
    h.vault
        .add_operation(&approver, cs.id, "m.txt", OperationKind::Create, Some(Bytes::from("m")))
        .await
        .unwrap();
    h.vault.submit(&approver, cs.id).unwrap();

    assert!(matches!(
        h.vault.review(&approver, cs.id, ReviewDecision::Approve, None),
        Err(VaultError::Conflict(_))
    ));

    let root = admin();
    let admin_cs = h.vault.create_change_set(&root, "Admin's", "").unwrap();
    h.vault
        .add_operation(&root, admin_cs.id, "r.txt", OperationKind::Create, Some(Bytes::from("r")))
        .await
        .unwrap();
    h.vault.submit(&root, admin_cs.id).unwrap();
    let reviewed = h
        .vault
        .review(&root, admin_cs.id, ReviewDecision::Approve, None)
        .unwrap();
    assert_eq!(reviewed.status, ChangeSetStatus::Approved);
}

#[tokio::test]
async fn test_editors_cannot_review() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Needs review", "").unwrap();
    h.vault
        .add_operation(&alice(), cs.id, "e.txt", OperationKind::Create, Some(Bytes::from("e")))
        .await
        .unwrap();
    h.vault.submit(&alice(), cs.id).unwrap();

    assert!(matches!(
        h.vault.review(&bob(), cs.id, ReviewDecision::Approve, None),
        Err(VaultError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn test_reject_then_resubmit_starts_fresh_review() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Try", "").unwrap();
    h.vault
        .add_operation(&alice(), cs.id, "t.txt", OperationKind::Create, Some(Bytes::from("1")))
        .await
        .unwrap();
    h.vault.submit(&alice(), cs.id).unwrap();

    let rejected = h
        .vault
        .review(&carol(), cs.id, ReviewDecision::Reject, Some("typo"))
        .unwrap();
    assert_eq!(rejected.status, ChangeSetStatus::Rejected);
    assert_eq!(rejected.review_comment.as_deref(), Some("typo"));

    // Rejected change sets are editable again
    h.vault
        .add_operation(&alice(), cs.id, "t.txt", OperationKind::Create, Some(Bytes::from("2")))
        .await
        .unwrap();
    let resubmitted = h.vault.submit(&alice(), cs.id).unwrap();
    assert_eq!(resubmitted.status, ChangeSetStatus::PendingReview);
    assert!(resubmitted.reviewer.is_none());
    assert!(resubmitted.review_comment.is_none());
    assert!(resubmitted.reviewed_at.is_none());
    assert_eq!(resubmitted.operations.len(), 1);
}

#[tokio::test]
async fn test_pending_change_set_is_frozen() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Frozen", "").unwrap();
    let staged = h
        .vault
        .add_operation(&alice(), cs.id, "f.txt", OperationKind::Create, Some(Bytes::from("f")))
        .await
        .unwrap();
    h.vault.submit(&alice(), cs.id).unwrap();

    assert!(matches!(
        h.vault
            .add_operation(&alice(), cs.id, "g.txt", OperationKind::Create, Some(Bytes::from("g")))
            .await,
        Err(VaultError::Conflict(_))
    ));
    assert!(matches!(
        h.vault
            .remove_operation(&alice(), cs.id, staged.operations[0].id)
            .await,
        Err(VaultError::Conflict(_))
    ));
    assert!(matches!(
        h.vault.update_change_set(&alice(), cs.id, Some("New"), None),
        Err(VaultError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_only_author_or_admin_may_stage() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Alice's", "").unwrap();

    assert!(matches!(
        h.vault
            .add_operation(&bob(), cs.id, "b.txt", OperationKind::Create, Some(Bytes::from("b")))
            .await,
        Err(VaultError::PermissionDenied(_))
    ));
    h.vault
        .add_operation(&admin(), cs.id, "b.txt", OperationKind::Create, Some(Bytes::from("b")))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_close_discards_staged_blobs_and_is_terminal() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Abandon", "").unwrap();
    let staged = h
        .vault
        .add_operation(&alice(), cs.id, "z.txt", OperationKind::Create, Some(Bytes::from("z")))
        .await
        .unwrap();
    let staged_key = staged.operations[0].staged_key.clone().unwrap();

    assert!(matches!(
        h.vault.close(&bob(), cs.id).await,
        Err(VaultError::PermissionDenied(_))
    ));

    let closed = h.vault.close(&alice(), cs.id).await.unwrap();
    assert_eq!(closed.status, ChangeSetStatus::Closed);
    assert!(closed.operations.is_empty());
    assert!(!h.store.exists(&staged_key).await.unwrap());

    assert!(matches!(
        h.vault.close(&alice(), cs.id).await,
        Err(VaultError::Conflict(_))
    ));
    assert!(matches!(
        h.vault.submit(&alice(), cs.id),
        Err(VaultError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_merged_change_set_cannot_be_closed_or_merged_again() {
    let h = harness();
    let id = commit(&h, &alice(), "m.txt", "m").await;

    assert!(matches!(
        h.vault.close(&alice(), id).await,
        Err(VaultError::Conflict(_))
    ));
    assert!(matches!(
        h.vault.merge(&alice(), id).await,
        Err(VaultError::Conflict(_))
    ));
    assert_eq!(h.vault.db().history("m.txt").unwrap().len(), 1);
}

// ============================================================================
// Staging semantics
// ============================================================================

#[tokio::test]
async fn test_restaging_a_path_replaces_and_discards_previous_blob() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Iterate", "").unwrap();

    let first = h
        .vault
        .add_operation(&alice(), cs.id, "p.txt", OperationKind::Create, Some(Bytes::from("one")))
        .await
        .unwrap();
    let first_key = first.operations[0].staged_key.clone().unwrap();

    let second = h
        .vault
        .add_operation(&alice(), cs.id, "p.txt", OperationKind::Create, Some(Bytes::from("two")))
        .await
        .unwrap();

    assert_eq!(second.change_set.operations.len(), 1);
    assert_ne!(second.operations[0].id, first.operations[0].id);
    assert!(!h.store.exists(&first_key).await.unwrap());

    land(&h, &alice(), cs.id).await;
    let file = h.vault.get_content("p.txt", None).await.unwrap();
    assert_eq!(file.content, Bytes::from("two"));
}

#[tokio::test]
async fn test_remove_operation_twice_is_not_found() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Oops", "").unwrap();
    let staged = h
        .vault
        .add_operation(&alice(), cs.id, "o.txt", OperationKind::Create, Some(Bytes::from("o")))
        .await
        .unwrap();
    let op = staged.operations[0].clone();

    let removed = h.vault.remove_operation(&alice(), cs.id, op.id).await.unwrap();
    assert_eq!(removed.id, op.id);
    assert!(!h.store.exists(op.staged_key.as_deref().unwrap()).await.unwrap());

    assert!(matches!(
        h.vault.remove_operation(&alice(), cs.id, op.id).await,
        Err(VaultError::NotFound(_))
    ));
    let events = h.audit.actions();
    assert_eq!(events.iter().filter(|a| *a == "cr.unstage").count(), 1);
}

#[tokio::test]
async fn test_edit_of_missing_path_must_use_create() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Edit", "").unwrap();

    let result = h
        .vault
        .add_operation(&alice(), cs.id, "nope.txt", OperationKind::Edit, Some(Bytes::from("x")))
        .await;
    assert!(matches!(result, Err(VaultError::NotFound(_))));

    // Nothing staged, nothing left in the staging area
    assert!(h.vault.get_change_set(cs.id).unwrap().operations.is_empty());
    let staging = h.store.list(keys::STAGING_PREFIX, "").await.unwrap();
    assert!(staging.files.iter().all(|f| f.key.ends_with('/')));
}

#[tokio::test]
async fn test_reserved_and_invalid_paths_are_rejected() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Sneaky", "").unwrap();

    for path in ["_staging/x", "_versions/y", "", "a/../b"] {
        let result = h
            .vault
            .add_operation(&alice(), cs.id, path, OperationKind::Create, Some(Bytes::from("x")))
            .await;
        assert!(matches!(result, Err(VaultError::Invalid(_))), "{path}");
    }
    assert!(matches!(
        h.vault.get_content("_staging/x", None).await,
        Err(VaultError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_create_requires_content() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "No content", "").unwrap();

    assert!(matches!(
        h.vault
            .add_operation(&alice(), cs.id, "n.txt", OperationKind::Create, None)
            .await,
        Err(VaultError::Invalid(_))
    ));
}

// ============================================================================
// Auto drafts and file-level staging
// ============================================================================

#[tokio::test]
async fn test_file_saves_collect_in_one_auto_draft() {
    let h = harness();

    let first = h
        .vault
        .stage_save(&alice(), "one.txt", Bytes::from("1"), None)
        .await
        .unwrap();
    assert!(first.auto_created);
    assert_eq!(first.change_set.title, "Changes by alice");
    assert_eq!(
        first.change_set.description,
        "Auto-created draft. Edit the title before submitting."
    );

    let second = h
        .vault
        .stage_save(&alice(), "two.txt", Bytes::from("2"), Some("Add numbers"))
        .await
        .unwrap();
    assert!(!second.auto_created);
    assert_eq!(second.change_set.id, first.change_set.id);
    assert_eq!(second.change_set.title, "Add numbers");
    assert_eq!(second.change_set.operations.len(), 2);

    // A custom title is not overwritten by later messages
    let third = h
        .vault
        .stage_save(&alice(), "three.txt", Bytes::from("3"), Some("Other"))
        .await
        .unwrap();
    assert_eq!(third.change_set.title, "Add numbers");

    // Another user gets their own draft
    let bobs = h
        .vault
        .stage_save(&bob(), "b.txt", Bytes::from("b"), None)
        .await
        .unwrap();
    assert_ne!(bobs.change_set.id, first.change_set.id);

    let actions = h.audit.actions();
    assert_eq!(actions.iter().filter(|a| *a == "cr.auto_create").count(), 2);
    assert_eq!(actions.iter().filter(|a| *a == "file.stage_create").count(), 4);
}

#[tokio::test]
async fn test_submitted_draft_is_not_reused() {
    let h = harness();
    let first = h
        .vault
        .stage_save(&alice(), "one.txt", Bytes::from("1"), None)
        .await
        .unwrap();
    h.vault.submit(&alice(), first.change_set.id).unwrap();

    let next = h
        .vault
        .stage_save(&alice(), "two.txt", Bytes::from("2"), None)
        .await
        .unwrap();
    assert!(next.auto_created);
    assert_ne!(next.change_set.id, first.change_set.id);
}

#[tokio::test]
async fn test_save_resolves_create_or_edit() {
    let h = harness();
    commit(&h, &alice(), "live.txt", "v1").await;

    let staged = h
        .vault
        .stage_save(&bob(), "live.txt", Bytes::from("v2"), None)
        .await
        .unwrap();
    assert_eq!(staged.operations[0].kind, OperationKind::Edit);
    assert_eq!(staged.operations[0].base_version, Some(1));

    let staged = h
        .vault
        .stage_save(&bob(), "fresh.txt", Bytes::from("new"), None)
        .await
        .unwrap();
    assert_eq!(staged.operations[0].kind, OperationKind::Create);
    assert_eq!(staged.operations[0].base_version, None);
}

#[tokio::test]
async fn test_viewer_may_delete_own_file_only() {
    let h = harness();
    // A viewer can end up as author of a version if promoted later
    let dana_editor = Actor::new("dana", Role::Editor);
    commit(&h, &dana_editor, "dana.txt", "mine").await;
    commit(&h, &alice(), "alice.txt", "hers").await;

    let dana = Actor::new("dana", Role::Viewer);
    let staged = h.vault.stage_delete(&dana, "dana.txt").await.unwrap();
    assert_eq!(staged.operations[0].kind, OperationKind::Delete);
    assert_eq!(staged.operations[0].base_version, Some(1));

    assert!(matches!(
        h.vault.stage_delete(&dana, "alice.txt").await,
        Err(VaultError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.vault.stage_delete(&alice(), "missing.txt").await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_restore_stages_old_content_as_next_version() {
    let h = harness();
    commit(&h, &alice(), "r.txt", "original").await;
    commit(&h, &alice(), "r.txt", "changed").await;

    let staged = h.vault.stage_restore(&bob(), "r.txt", 1).await.unwrap();
    assert_eq!(staged.operations[0].kind, OperationKind::Edit);
    land(&h, &bob(), staged.change_set.id).await;

    let file = h.vault.get_content("r.txt", None).await.unwrap();
    assert_eq!(file.version.version, 3);
    assert_eq!(file.content, Bytes::from("original"));
    assert!(h
        .audit
        .events()
        .iter()
        .any(|e| e.action == "file.stage_restore" && e.details["from_version"] == 1));

    assert!(matches!(
        h.vault.stage_restore(&bob(), "r.txt", 9).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_restore_of_deleted_file_becomes_create() {
    let h = harness();
    commit(&h, &alice(), "d.txt", "keep me").await;
    let cs = h.vault.create_change_set(&alice(), "Delete", "").unwrap();
    h.vault
        .add_operation(&alice(), cs.id, "d.txt", OperationKind::Delete, None)
        .await
        .unwrap();
    land(&h, &alice(), cs.id).await;

    assert!(matches!(
        h.vault.stage_restore(&alice(), "d.txt", 2).await,
        Err(VaultError::Gone(_))
    ));

    let staged = h.vault.stage_restore(&alice(), "d.txt", 1).await.unwrap();
    assert_eq!(staged.operations[0].kind, OperationKind::Create);
}

#[tokio::test]
async fn test_viewers_cannot_stage_saves() {
    let h = harness();
    let viewer = Actor::new("vic", Role::Viewer);

    assert!(matches!(
        h.vault
            .stage_save(&viewer, "v.txt", Bytes::from("v"), None)
            .await,
        Err(VaultError::PermissionDenied(_))
    ));
}

// ============================================================================
// Folders, browse and search
// ============================================================================

#[tokio::test]
async fn test_folder_create_browse_and_stage_delete() {
    let h = harness();
    h.vault.create_folder(&alice(), "docs").await.unwrap();
    commit(&h, &alice(), "docs/a.md", "a").await;
    commit(&h, &alice(), "docs/b.md", "b").await;
    commit(&h, &alice(), "top.txt", "t").await;

    let root = h.vault.browse("").await.unwrap();
    assert_eq!(root.folders, vec!["docs/".to_string()]);
    let names: Vec<_> = root.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["top.txt"]);
    assert_eq!(root.files[0].version, Some(1));

    let docs = h.vault.browse("docs").await.unwrap();
    let paths: Vec<_> = docs.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["docs/a.md", "docs/b.md"]);

    let staged = h.vault.stage_delete_folder(&alice(), "docs").await.unwrap();
    assert_eq!(staged.operations.len(), 2);
    assert!(staged
        .operations
        .iter()
        .all(|op| op.kind == OperationKind::Delete));
    land(&h, &alice(), staged.change_set.id).await;

    assert!(h.vault.list_current_files("docs").unwrap().is_empty());
    assert!(matches!(
        h.vault.stage_delete_folder(&alice(), "docs").await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_search_finds_live_files_only() {
    let h = harness();
    commit(&h, &alice(), "guides/Install.md", "i").await;
    commit(&h, &alice(), "guides/usage.md", "u").await;

    let cs = h.vault.create_change_set(&alice(), "Drop usage", "").unwrap();
    h.vault
        .add_operation(&alice(), cs.id, "guides/usage.md", OperationKind::Delete, None)
        .await
        .unwrap();
    land(&h, &alice(), cs.id).await;

    let hits = h.vault.search("GUIDES").unwrap();
    let paths: Vec<_> = hits.iter().map(|f| f.version.file_path.as_str()).collect();
    assert_eq!(paths, vec!["guides/Install.md"]);
    assert!(h.vault.search("  ").unwrap().is_empty());
}

// ============================================================================
// History and diffs
// ============================================================================

#[tokio::test]
async fn test_history_and_version_diff() {
    let h = harness();
    commit(&h, &alice(), "h.txt", "one\ntwo\n").await;
    commit(&h, &bob(), "h.txt", "one\n2\n").await;

    let history = h.vault.history("h.txt").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 2);

    let diff = h.vault.diff("h.txt", 1, 2).await.unwrap();
    assert_eq!(diff.added, 1);
    assert_eq!(diff.removed, 1);
    assert!(diff.unified.contains("-two\n+2\n"));

    assert!(matches!(
        h.vault.history("never.txt"),
        Err(VaultError::NotFound(_))
    ));
    assert!(matches!(
        h.vault.diff("h.txt", 1, 7).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_operation_diff_against_base() {
    let h = harness();
    commit(&h, &alice(), "o.txt", "before\n").await;

    let cs = h.vault.create_change_set(&bob(), "Tweak", "").unwrap();
    let edit = h
        .vault
        .add_operation(&bob(), cs.id, "o.txt", OperationKind::Edit, Some(Bytes::from("after\n")))
        .await
        .unwrap();
    let create = h
        .vault
        .add_operation(&bob(), cs.id, "n.txt", OperationKind::Create, Some(Bytes::from("new\n")))
        .await
        .unwrap();

    let diff = h
        .vault
        .operation_diff(cs.id, edit.operations[0].id)
        .await
        .unwrap();
    assert_eq!(diff.old_content, "before\n");
    assert_eq!(diff.new_content, "after\n");

    let diff = h
        .vault
        .operation_diff(cs.id, create.operations[0].id)
        .await
        .unwrap();
    assert_eq!(diff.old_label, "Empty");
    assert_eq!(diff.added, 1);

    // Once the staged blob is gone the diff still renders
    let key = create.operations[0].staged_key.clone().unwrap();
    h.store.delete(&key).await.unwrap();
    let diff = h
        .vault
        .operation_diff(cs.id, create.operations[0].id)
        .await
        .unwrap();
    assert_eq!(diff.new_content, "[Content unavailable]");
}

// ============================================================================
// Sharing
// ============================================================================

#[tokio::test]
async fn test_toggle_public_keeps_token() {
    let h = harness();
    commit(&h, &alice(), "share.txt", "shared").await;

    let on = h.vault.toggle_public(&alice(), "share.txt").unwrap();
    assert!(on.is_public);
    let off = h.vault.toggle_public(&alice(), "share.txt").unwrap();
    assert!(!off.is_public);
    assert_eq!(on.token, off.token);
    assert!(!on.token.is_empty());
}

#[tokio::test]
async fn test_public_resolution_rules() {
    let h = harness();
    commit(&h, &alice(), "pub.txt", "hello public").await;

    let record = h.vault.toggle_public(&alice(), "pub.txt").unwrap();
    let by_token = PublicRef::Token(record.token.clone());

    let file = h.vault.resolve_public(&by_token).await.unwrap();
    assert_eq!(file.content, Bytes::from("hello public"));
    let file = h
        .vault
        .resolve_public(&PublicRef::Path("pub.txt".to_string()))
        .await
        .unwrap();
    assert_eq!(file.version.version, 1);

    assert!(matches!(
        h.vault
            .resolve_public(&PublicRef::Token("bogus".to_string()))
            .await,
        Err(VaultError::NotFound(_))
    ));

    h.vault.toggle_archive(&alice(), "pub.txt").unwrap();
    assert!(matches!(
        h.vault.resolve_public(&by_token).await,
        Err(VaultError::Gone(_))
    ));
    h.vault.toggle_archive(&alice(), "pub.txt").unwrap();

    let cs = h.vault.create_change_set(&alice(), "Remove", "").unwrap();
    h.vault
        .add_operation(&alice(), cs.id, "pub.txt", OperationKind::Delete, None)
        .await
        .unwrap();
    land(&h, &alice(), cs.id).await;
    assert!(matches!(
        h.vault.resolve_public(&by_token).await,
        Err(VaultError::Gone(_))
    ));

    h.vault.toggle_public(&alice(), "pub.txt").unwrap();
    assert!(matches!(
        h.vault.resolve_public(&by_token).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_listing_carries_share_flags() {
    let h = harness();
    commit(&h, &alice(), "flag.txt", "f").await;
    h.vault.toggle_public(&alice(), "flag.txt").unwrap();

    let files = h.vault.list_current_files("").unwrap();
    assert!(files[0].is_public);
    assert!(!files[0].is_archived);
    assert!(h.vault.share_info("flag.txt").unwrap().is_some());
    assert!(h.vault.share_info("other.txt").unwrap().is_none());
}

#[tokio::test]
async fn test_toggle_unknown_path_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.vault.toggle_public(&alice(), "ghost.txt"),
        Err(VaultError::NotFound(_))
    ));
}

// ============================================================================
// Strict merge, queries and stats
// ============================================================================

#[tokio::test]
async fn test_lenient_merge_lets_last_approved_win() {
    let h = harness();
    commit(&h, &alice(), "race.txt", "base").await;

    let first = h.vault.create_change_set(&alice(), "First", "").unwrap();
    let second = h.vault.create_change_set(&bob(), "Second", "").unwrap();
    for (actor, id, content) in [(alice(), first.id, "alice"), (bob(), second.id, "bob")] {
        h.vault
            .add_operation(&actor, id, "race.txt", OperationKind::Edit, Some(Bytes::from(content)))
            .await
            .unwrap();
    }

    land(&h, &alice(), first.id).await;
    land(&h, &bob(), second.id).await;

    let file = h.vault.get_content("race.txt", None).await.unwrap();
    assert_eq!(file.version.version, 3);
    assert_eq!(file.content, Bytes::from("bob"));
}

#[tokio::test]
async fn test_strict_merge_rejects_stale_base() {
    let h = harness_with(true);
    commit(&h, &alice(), "race.txt", "base").await;

    let first = h.vault.create_change_set(&alice(), "First", "").unwrap();
    let second = h.vault.create_change_set(&bob(), "Second", "").unwrap();
    for (actor, id, content) in [(alice(), first.id, "alice"), (bob(), second.id, "bob")] {
        h.vault
            .add_operation(&actor, id, "race.txt", OperationKind::Edit, Some(Bytes::from(content)))
            .await
            .unwrap();
    }
    land(&h, &alice(), first.id).await;

    h.vault.submit(&bob(), second.id).unwrap();
    h.vault
        .review(&carol(), second.id, ReviewDecision::Approve, None)
        .unwrap();
    let result = h.vault.merge(&bob(), second.id).await;
    assert!(matches!(result, Err(VaultError::Conflict(_))));

    // Nothing from the stale change set was committed
    assert_eq!(h.vault.db().history("race.txt").unwrap().len(), 2);
    let still = h.vault.get_change_set(second.id).unwrap();
    assert_eq!(still.status, ChangeSetStatus::Approved);
}

#[tokio::test]
async fn test_list_change_sets_filters_and_paginates() {
    let h = harness();
    for i in 0..3 {
        h.vault
            .create_change_set(&alice(), &format!("Alice {i}"), "")
            .unwrap();
    }
    let bobs = h.vault.create_change_set(&bob(), "Bob", "").unwrap();
    h.vault
        .add_operation(&bob(), bobs.id, "b.txt", OperationKind::Create, Some(Bytes::from("b")))
        .await
        .unwrap();
    h.vault.submit(&bob(), bobs.id).unwrap();

    let by_alice = ChangeSetFilter {
        status: None,
        author: Some("alice".to_string()),
    };
    let (page, total) = h.vault.list_change_sets(&by_alice, 2, 0).unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].title, "Alice 2");

    let pending = ChangeSetFilter {
        status: Some(ChangeSetStatus::PendingReview),
        author: None,
    };
    let (page, total) = h.vault.list_change_sets(&pending, 10, 0).unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].id, bobs.id);
}

#[tokio::test]
async fn test_update_change_set_metadata() {
    let h = harness();
    let cs = h.vault.create_change_set(&alice(), "Old", "desc").unwrap();

    let updated = h
        .vault
        .update_change_set(&alice(), cs.id, Some("New title"), None)
        .unwrap();
    assert_eq!(updated.title, "New title");
    assert_eq!(updated.description, "desc");

    assert!(matches!(
        h.vault.update_change_set(&alice(), cs.id, Some("   "), None),
        Err(VaultError::Invalid(_))
    ));
    assert!(matches!(
        h.vault.update_change_set(&bob(), cs.id, Some("Hijack"), None),
        Err(VaultError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn test_stats_for_admins() {
    let h = harness();
    commit(&h, &alice(), "s.txt", "1").await;
    commit(&h, &alice(), "s.txt", "2").await;
    h.vault
        .stage_save(&bob(), "pending.txt", Bytes::from("p"), None)
        .await
        .unwrap();

    let stats = h.vault.stats(&admin()).unwrap();
    assert_eq!(stats.live_files, 1);
    assert_eq!(stats.total_versions, 2);
    assert_eq!(stats.total_change_sets, 3);
    assert_eq!(stats.pending_review, 0);

    assert!(matches!(
        h.vault.stats(&alice()),
        Err(VaultError::PermissionDenied(_))
    ));
}
