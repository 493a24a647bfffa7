//! Pure reduction over [`TransferState`].
//!
//! [`apply`] is total: every action yields a state, and an action whose
//! precondition does not hold yields an unchanged copy of the input. This is
//! what makes duplicate or late terminal callbacks harmless: the second
//! `FileUploaded`/`UploadError` for an id finds it no longer `current`.

use crate::models::{
    AssetType, CancelHandle, FailedUpload, FileDescriptor, FileId, FileStatus, TransferState,
};
use crate::state::action::Action;
use std::collections::HashSet;

/// Apply `action` to `state`, returning the next state.
pub fn apply(state: &TransferState, action: Action) -> TransferState {
    let mut next = state.clone();
    match action {
        Action::Load(files) => append_files(&mut next, files),
        Action::Submit { pending, retry } => submit(&mut next, pending, retry),
        Action::StartNext { id, cancel } => start_next(&mut next, id, cancel),
        Action::UploadProgress { id, progress } => upload_progress(&mut next, id, progress),
        Action::SetAbortHandler { id, handle } => set_abort_handler(&mut next, id, handle),
        Action::FileUploaded { id, version_ids } => file_uploaded(&mut next, id, version_ids),
        Action::UploadError { id, message } => upload_error(&mut next, id, message),
        Action::Cancel(id) => cancel(&mut next, id),
        Action::Retry(id) => retry(&mut next, id),
        Action::Remove(id) => remove(&mut next, id),
        Action::Select { id, selected } => select(&mut next, id, selected),
        Action::SetAssetType { id, asset_type } => set_asset_type(&mut next, id, asset_type),
        Action::DiscardFiles { keep_unselected } => {
            next = discard(&next, keep_unselected);
        }
        Action::UploadComplete => {
            if next.uploading && next.pending.is_empty() && next.current.is_none() {
                next.uploading = false;
            }
        }
        Action::FetchStarted => next.loading = true,
        Action::FetchFinished(files) => {
            append_files(&mut next, files);
            next.loading = false;
        }
    }
    next
}

fn current_uploading(state: &mut TransferState, id: FileId) -> Option<&mut FileDescriptor> {
    if state.current != Some(id) {
        return None;
    }
    state.files.get_mut(&id).filter(|f| f.is_uploading())
}

fn append_files(state: &mut TransferState, files: Vec<FileDescriptor>) {
    let mut names: HashSet<String> = state.files.values().map(|f| f.name.clone()).collect();
    for mut file in files {
        if state.files.contains_key(&file.id) || !names.insert(file.name.clone()) {
            continue;
        }
        // Loaded files never arrive mid-transfer.
        if file.is_uploading() {
            file.status = FileStatus::Ready;
        }
        file.cancel = None;
        if file.status == FileStatus::Complete {
            state.uploaded.insert(file.id);
        }
        state.files.insert(file.id, file);
    }
}

fn submit(state: &mut TransferState, pending: Vec<FileId>, retry: Vec<FileId>) {
    if state.uploading {
        return;
    }
    let retry_ids: HashSet<FileId> = retry.iter().copied().collect();
    for id in pending.into_iter().chain(retry) {
        if state.pending.contains(&id) || state.current == Some(id) {
            continue;
        }
        let Some(file) = state.files.get_mut(&id) else {
            continue;
        };
        if !file.status.can_start() {
            continue;
        }
        if retry_ids.contains(&id) {
            file.status = FileStatus::Ready;
            file.error = None;
            file.progress = 0;
            state.failed.shift_remove(&id);
        }
        state.pending.push_back(id);
    }
    if !state.pending.is_empty() {
        state.uploading = true;
    }
}

fn start_next(state: &mut TransferState, id: FileId, cancel: CancelHandle) {
    if state.current.is_some() {
        return;
    }
    let Some(position) = state.pending.iter().position(|p| *p == id) else {
        return;
    };
    let Some(file) = state.files.get_mut(&id) else {
        return;
    };
    if !file.status.can_start() {
        return;
    }
    state.pending.remove(position);
    file.status = FileStatus::Uploading;
    file.progress = 0;
    file.error = None;
    file.cancel = Some(cancel);
    state.current = Some(id);
}

fn upload_progress(state: &mut TransferState, id: FileId, progress: u8) {
    if let Some(file) = current_uploading(state, id) {
        file.progress = file.progress.max(progress.min(100));
    }
}

fn set_abort_handler(state: &mut TransferState, id: FileId, handle: CancelHandle) {
    if let Some(file) = current_uploading(state, id) {
        file.cancel.get_or_insert_with(CancelHandle::default).merge(handle);
    }
}

fn file_uploaded(state: &mut TransferState, id: FileId, version_ids: Vec<String>) {
    let Some(file) = current_uploading(state, id) else {
        return;
    };
    file.status = FileStatus::Complete;
    file.progress = 100;
    file.cancel = None;
    file.error = None;
    file.version_ids = version_ids;
    state.uploaded.insert(id);
    state.failed.shift_remove(&id);
    state.current = None;
}

fn upload_error(state: &mut TransferState, id: FileId, message: String) {
    let Some(file) = current_uploading(state, id) else {
        return;
    };
    file.status = FileStatus::Failed;
    file.cancel = None;
    file.error = Some(message.clone());
    let snapshot = file.clone();
    state.failed.insert(id, FailedUpload { message, snapshot });
    state.uploaded.shift_remove(&id);
    state.current = None;
}

fn cancel(state: &mut TransferState, id: FileId) {
    let Some(file) = state.files.get_mut(&id).filter(|f| f.is_uploading()) else {
        return;
    };
    if let Some(handle) = file.cancel.take() {
        handle.cancel();
    }
    file.status = FileStatus::Cancelled;
    if state.current == Some(id) {
        state.current = None;
    }
}

fn retry(state: &mut TransferState, id: FileId) {
    let Some(file) = state.files.get_mut(&id) else {
        return;
    };
    if !file.status.is_retryable() {
        return;
    }
    file.status = FileStatus::Ready;
    file.error = None;
    file.progress = 0;
    state.failed.shift_remove(&id);
    state.pending.retain(|p| *p != id);
    state.pending.push_front(id);
    state.uploading = true;
}

fn remove(state: &mut TransferState, id: FileId) {
    match state.files.get(&id) {
        Some(file) if !file.is_uploading() => {}
        _ => return,
    }
    state.files.shift_remove(&id);
    state.pending.retain(|p| *p != id);
    state.uploaded.shift_remove(&id);
    state.failed.shift_remove(&id);
}

fn select(state: &mut TransferState, id: FileId, selected: bool) {
    if let Some(file) = state
        .files
        .get_mut(&id)
        .filter(|f| f.status == FileStatus::Complete)
    {
        file.selected = selected;
    }
}

fn set_asset_type(state: &mut TransferState, id: FileId, asset_type: AssetType) {
    if let Some(file) = state
        .files
        .get_mut(&id)
        .filter(|f| !matches!(f.status, FileStatus::Uploading | FileStatus::Complete))
    {
        file.asset_type = asset_type;
    }
}

fn discard(state: &TransferState, keep_unselected: bool) -> TransferState {
    for file in state.files.values() {
        if let Some(handle) = &file.cancel {
            handle.cancel();
        }
    }
    let mut next = TransferState::default();
    if !keep_unselected {
        return next;
    }
    for file in state.files.values().filter(|f| !f.selected) {
        let mut kept = file.clone();
        if kept.is_uploading() {
            kept.status = FileStatus::Cancelled;
            kept.cancel = None;
        }
        match kept.status {
            FileStatus::Complete => {
                next.uploaded.insert(kept.id);
            }
            FileStatus::Failed => {
                if let Some(entry) = state.failed.get(&kept.id) {
                    next.failed.insert(kept.id, entry.clone());
                }
            }
            _ => {}
        }
        next.files.insert(kept.id, kept);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawFile;
    use tokio_util::sync::CancellationToken;

    fn descriptor(name: &str) -> FileDescriptor {
        FileDescriptor::new(RawFile::new(name, 100), AssetType::Image)
    }

    fn loaded(names: &[&str]) -> (TransferState, Vec<FileId>) {
        let files: Vec<FileDescriptor> = names.iter().map(|n| descriptor(n)).collect();
        let ids = files.iter().map(|f| f.id).collect();
        (apply(&TransferState::default(), Action::Load(files)), ids)
    }

    fn submitted(names: &[&str]) -> (TransferState, Vec<FileId>) {
        let (state, ids) = loaded(names);
        let state = apply(
            &state,
            Action::Submit {
                pending: ids.clone(),
                retry: vec![],
            },
        );
        (state, ids)
    }

    fn start(state: &TransferState, id: FileId) -> (TransferState, CancellationToken) {
        let token = CancellationToken::new();
        let next = apply(
            state,
            Action::StartNext {
                id,
                cancel: CancelHandle::new(token.clone()),
            },
        );
        (next, token)
    }

    #[test]
    fn test_load_preserves_order_and_skips_duplicates() {
        let (state, ids) = loaded(&["a.jpg", "b.jpg"]);
        let again = apply(&state, Action::Load(vec![descriptor("a.jpg"), descriptor("c.jpg")]));

        let names: Vec<&str> = again.files.values().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(again.files.get_index(0).map(|(id, _)| *id), Some(ids[0]));
        assert!(again.files.values().all(|f| f.status == FileStatus::Ready));
    }

    #[test]
    fn test_submit_queues_in_order() {
        let (state, ids) = submitted(&["a.jpg", "b.jpg", "c.jpg"]);
        assert!(state.uploading);
        assert_eq!(state.pending.iter().copied().collect::<Vec<_>>(), ids);
        assert!(state.current.is_none());
    }

    #[test]
    fn test_submit_refused_while_uploading() {
        let (state, _) = submitted(&["a.jpg"]);
        let state = apply(&state, Action::Load(vec![descriptor("b.jpg")]));
        let b = *state.files.keys().last().unwrap();

        let next = apply(
            &state,
            Action::Submit {
                pending: vec![b],
                retry: vec![],
            },
        );
        assert_eq!(next.pending.len(), 1);
        assert!(!next.is_pending(&b));
    }

    #[test]
    fn test_start_next_promotes_head() {
        let (state, ids) = submitted(&["a.jpg", "b.jpg"]);
        let (state, _) = start(&state, ids[0]);

        assert_eq!(state.current, Some(ids[0]));
        assert_eq!(state.status_of(&ids[0]), Some(FileStatus::Uploading));
        assert!(state.file(&ids[0]).unwrap().cancel.is_some());
        assert_eq!(state.pending.iter().copied().collect::<Vec<_>>(), vec![ids[1]]);
        assert!(state.check_invariants().is_ok());

        // A second start while a transfer is current is refused.
        let (blocked, _) = start(&state, ids[1]);
        assert_eq!(blocked.current, Some(ids[0]));
        assert_eq!(blocked.status_of(&ids[1]), Some(FileStatus::Ready));
        assert!(blocked.check_invariants().is_ok());
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let (state, ids) = submitted(&["a.jpg"]);
        let (state, _) = start(&state, ids[0]);

        let state = apply(&state, Action::UploadProgress { id: ids[0], progress: 40 });
        assert_eq!(state.file(&ids[0]).unwrap().progress, 40);

        let state = apply(&state, Action::UploadProgress { id: ids[0], progress: 20 });
        assert_eq!(state.file(&ids[0]).unwrap().progress, 40);

        let state = apply(&state, Action::UploadProgress { id: ids[0], progress: 250 });
        assert_eq!(state.file(&ids[0]).unwrap().progress, 100);
    }

    #[test]
    fn test_progress_for_non_current_is_ignored() {
        let (state, ids) = submitted(&["a.jpg", "b.jpg"]);
        let (state, _) = start(&state, ids[0]);
        let next = apply(&state, Action::UploadProgress { id: ids[1], progress: 50 });
        assert_eq!(next.file(&ids[1]).unwrap().progress, 0);
    }

    #[test]
    fn test_file_uploaded_is_idempotent() {
        let (state, ids) = submitted(&["a.jpg", "b.jpg"]);
        let (state, _) = start(&state, ids[0]);

        let done = apply(
            &state,
            Action::FileUploaded {
                id: ids[0],
                version_ids: vec!["v1".into()],
            },
        );
        let file = done.file(&ids[0]).unwrap();
        assert_eq!(file.status, FileStatus::Complete);
        assert_eq!(file.progress, 100);
        assert!(file.cancel.is_none());
        assert_eq!(file.version_ids, vec!["v1".to_string()]);
        assert!(done.uploaded.contains(&ids[0]));
        assert!(done.current.is_none());

        // Start the next file, then deliver a duplicate completion for the first.
        let (running, _) = start(&done, ids[1]);
        let duplicate = apply(
            &running,
            Action::FileUploaded {
                id: ids[0],
                version_ids: vec!["v2".into()],
            },
        );
        assert_eq!(duplicate.current, Some(ids[1]));
        assert_eq!(duplicate.file(&ids[0]).unwrap().version_ids, vec!["v1".to_string()]);
        assert_eq!(duplicate.status_of(&ids[1]), Some(FileStatus::Uploading));
    }

    #[test]
    fn test_upload_error_records_failure_once() {
        let (state, ids) = submitted(&["c.jpg"]);
        let (state, _) = start(&state, ids[0]);

        let failed = apply(
            &state,
            Action::UploadError {
                id: ids[0],
                message: "server said no".into(),
            },
        );
        let file = failed.file(&ids[0]).unwrap();
        assert_eq!(file.status, FileStatus::Failed);
        assert_eq!(file.error.as_deref(), Some("server said no"));
        assert!(file.cancel.is_none());
        assert_eq!(failed.failed.get(&ids[0]).unwrap().message, "server said no");
        assert!(failed.current.is_none());

        let again = apply(
            &failed,
            Action::UploadError {
                id: ids[0],
                message: "second".into(),
            },
        );
        assert_eq!(again.failed.get(&ids[0]).unwrap().message, "server said no");
    }

    #[test]
    fn test_cancel_invokes_handle_and_ignores_late_success() {
        let (state, ids) = submitted(&["a.jpg"]);
        let (state, token) = start(&state, ids[0]);

        let cancelled = apply(&state, Action::Cancel(ids[0]));
        assert!(token.is_cancelled());
        assert_eq!(cancelled.status_of(&ids[0]), Some(FileStatus::Cancelled));
        assert!(cancelled.file(&ids[0]).unwrap().cancel.is_none());
        assert!(cancelled.current.is_none());

        let late = apply(
            &cancelled,
            Action::FileUploaded {
                id: ids[0],
                version_ids: vec![],
            },
        );
        assert_eq!(late.status_of(&ids[0]), Some(FileStatus::Cancelled));
        assert!(!late.uploaded.contains(&ids[0]));
    }

    #[test]
    fn test_cancel_is_noop_for_non_uploading() {
        let (state, ids) = submitted(&["a.jpg"]);
        let next = apply(&state, Action::Cancel(ids[0]));
        assert_eq!(next.status_of(&ids[0]), Some(FileStatus::Ready));
        assert!(next.is_pending(&ids[0]));
    }

    #[test]
    fn test_retry_jumps_queue() {
        let (state, ids) = submitted(&["a.jpg", "b.jpg", "c.jpg"]);
        let (state, _) = start(&state, ids[0]);
        let state = apply(
            &state,
            Action::UploadError {
                id: ids[0],
                message: "timeout".into(),
            },
        );
        assert_eq!(state.pending.iter().copied().collect::<Vec<_>>(), vec![ids[1], ids[2]]);

        let state = apply(&state, Action::Retry(ids[0]));
        assert_eq!(state.pending.front(), Some(&ids[0]));
        assert_eq!(state.status_of(&ids[0]), Some(FileStatus::Ready));
        assert!(!state.failed.contains_key(&ids[0]));

        let (state, _) = start(&state, ids[0]);
        assert_eq!(state.current, Some(ids[0]));
    }

    #[test]
    fn test_retry_never_bypasses_single_flight() {
        let (state, ids) = submitted(&["a.jpg", "b.jpg"]);
        let (state, _) = start(&state, ids[0]);
        let state = apply(&state, Action::Cancel(ids[0]));
        let (state, _) = start(&state, ids[1]);

        let state = apply(&state, Action::Retry(ids[0]));
        assert_eq!(state.current, Some(ids[1]));
        assert_eq!(state.status_of(&ids[0]), Some(FileStatus::Ready));
        assert_eq!(state.uploading_count(), 1);
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_retry_rejects_complete() {
        let (state, ids) = submitted(&["a.jpg"]);
        let (state, _) = start(&state, ids[0]);
        let state = apply(
            &state,
            Action::FileUploaded {
                id: ids[0],
                version_ids: vec![],
            },
        );
        let next = apply(&state, Action::Retry(ids[0]));
        assert_eq!(next.status_of(&ids[0]), Some(FileStatus::Complete));
        assert!(next.pending.is_empty());
    }

    #[test]
    fn test_remove_refuses_uploading() {
        let (state, ids) = submitted(&["a.jpg", "b.jpg"]);
        let (state, _) = start(&state, ids[0]);

        let kept = apply(&state, Action::Remove(ids[0]));
        assert!(kept.file(&ids[0]).is_some());

        let removed = apply(&state, Action::Remove(ids[1]));
        assert!(removed.file(&ids[1]).is_none());
        assert!(!removed.is_pending(&ids[1]));
    }

    #[test]
    fn test_select_only_complete() {
        let (state, ids) = submitted(&["a.jpg"]);
        let not_yet = apply(&state, Action::Select { id: ids[0], selected: true });
        assert!(!not_yet.file(&ids[0]).unwrap().selected);

        let (state, _) = start(&state, ids[0]);
        let state = apply(
            &state,
            Action::FileUploaded {
                id: ids[0],
                version_ids: vec![],
            },
        );
        let selected = apply(&state, Action::Select { id: ids[0], selected: true });
        assert!(selected.file(&ids[0]).unwrap().selected);
    }

    #[test]
    fn test_asset_type_locked_once_started() {
        let (state, ids) = submitted(&["a.jpg"]);
        let changed = apply(
            &state,
            Action::SetAssetType {
                id: ids[0],
                asset_type: AssetType::Document,
            },
        );
        assert_eq!(changed.file(&ids[0]).unwrap().asset_type, AssetType::Document);

        let (running, _) = start(&changed, ids[0]);
        let locked = apply(
            &running,
            Action::SetAssetType {
                id: ids[0],
                asset_type: AssetType::Video,
            },
        );
        assert_eq!(locked.file(&ids[0]).unwrap().asset_type, AssetType::Document);
    }

    #[test]
    fn test_discard_resets_and_cancels() {
        let (state, ids) = submitted(&["a.jpg", "b.jpg"]);
        let (state, token) = start(&state, ids[0]);

        let discarded = apply(&state, Action::DiscardFiles { keep_unselected: false });
        assert!(token.is_cancelled());
        assert!(discarded.files.is_empty());
        assert!(discarded.pending.is_empty());
        assert!(!discarded.uploading);
    }

    #[test]
    fn test_discard_keeps_unselected() {
        let (state, ids) = submitted(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut state = state;
        for id in &ids[..2] {
            let (s, _) = start(&state, *id);
            state = apply(
                &s,
                Action::FileUploaded {
                    id: *id,
                    version_ids: vec![],
                },
            );
        }
        let state = apply(&state, Action::Select { id: ids[0], selected: true });

        let next = apply(&state, Action::DiscardFiles { keep_unselected: true });
        let names: Vec<&str> = next.files.values().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b.jpg", "c.jpg"]);
        assert!(next.uploaded.contains(&ids[1]));
        assert!(next.pending.is_empty());
        assert!(next.check_invariants().is_ok());
    }

    #[test]
    fn test_upload_complete_only_when_drained() {
        let (state, ids) = submitted(&["a.jpg"]);
        let early = apply(&state, Action::UploadComplete);
        assert!(early.uploading);

        let (state, _) = start(&state, ids[0]);
        let state = apply(
            &state,
            Action::FileUploaded {
                id: ids[0],
                version_ids: vec![],
            },
        );
        let done = apply(&state, Action::UploadComplete);
        assert!(!done.uploading);
    }

    #[test]
    fn test_fetch_finished_adds_completed_files() {
        let state = apply(&TransferState::default(), Action::FetchStarted);
        assert!(state.loading);

        let remote = FileDescriptor::already_uploaded(
            RawFile::new("old.png", 10),
            AssetType::Image,
            vec!["v9".into()],
        );
        let id = remote.id;
        let state = apply(&state, Action::FetchFinished(vec![remote]));
        assert!(!state.loading);
        assert!(state.uploaded.contains(&id));
        assert_eq!(state.status_of(&id), Some(FileStatus::Complete));
    }
}
