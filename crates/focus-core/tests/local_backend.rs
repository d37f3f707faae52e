use std::sync::Arc;

use focus_core::backend::Backend;
use focus_core::commands::{Command, Flow, dispatch};
use focus_core::config::BackendConfig;
use focus_core::datastore::LocalBackend;
use focus_core::error::{InitializationError, OperationError};
use focus_core::filter::TaskFilter;
use focus_core::session::{SessionManager, UserId};
use focus_core::store::TaskStore;
use focus_core::task::{Category, NewTask, Priority, Task};
use focus_core::view_model::{Capability, DELETE_PROMPT, SessionState, ViewModel};
use parking_lot::Mutex;
use tempfile::tempdir;

fn new_task(title: &str) -> NewTask {
    NewTask {
        title: title.to_string(),
        category: Category::Study,
        priority: Priority::Low,
    }
}

#[test]
fn sign_up_validation_messages() {
    let temp = tempdir().expect("tempdir");
    let backend = LocalBackend::open(temp.path()).expect("open backend");

    let err = backend.sign_up("not-an-email", "hunter22").unwrap_err();
    assert_eq!(err.message(), "invalid email address");

    let err = backend.sign_up("ana@example.com", "123").unwrap_err();
    assert_eq!(err.message(), "password should be at least 6 characters");

    backend
        .sign_up("ana@example.com", "hunter22")
        .expect("sign up should succeed");
    let err = backend.sign_up("ANA@example.com", "hunter22").unwrap_err();
    assert_eq!(err.message(), "email already in use");

    let err = backend.sign_in("ana@example.com", "wrong!!").unwrap_err();
    assert_eq!(err.message(), "invalid credentials");
    let err = backend.sign_in("bo@example.com", "hunter22").unwrap_err();
    assert_eq!(err.message(), "invalid credentials");
}

#[test]
fn collection_crud_pushes_full_snapshots() {
    let temp = tempdir().expect("tempdir");
    let backend = LocalBackend::open(temp.path()).expect("open backend");
    let principal = backend
        .sign_up("ana@example.com", "hunter22")
        .expect("sign up");
    let user = principal.uid.clone();

    let seen: Arc<Mutex<Vec<Vec<Task>>>> = Arc::default();
    let sink = seen.clone();
    let sub = backend
        .subscribe(&user, Arc::new(move |snapshot: Vec<Task>| sink.lock().push(snapshot)))
        .expect("subscribe");

    backend.create(&user, new_task("Read chapter 3")).expect("create");
    backend.create(&user, new_task("Flashcards")).expect("create");

    let latest = seen.lock().last().cloned().expect("snapshot delivered");
    assert_eq!(latest.len(), 2);
    assert!(latest.iter().all(|t| !t.completed && t.created_at.is_some()));

    let id = latest[0].id.clone();
    backend.set_completed(&user, &id, true).expect("toggle");
    let latest = seen.lock().last().cloned().expect("snapshot delivered");
    assert!(latest.iter().find(|t| t.id == id).expect("still present").completed);

    backend.delete(&user, &id).expect("delete");
    let latest = seen.lock().last().cloned().expect("snapshot delivered");
    assert_eq!(latest.len(), 1);
    assert!(latest.iter().all(|t| t.id != id));

    assert!(matches!(
        backend.delete(&user, &id),
        Err(OperationError::NotFound { .. })
    ));

    // initial + 2 creates + toggle + delete
    assert_eq!(seen.lock().len(), 5);
    assert_eq!(backend.listener_count(), (0, 1));
    sub.cancel();
    assert_eq!(backend.listener_count(), (0, 0));
}

#[test]
fn collections_are_private_to_their_owner() {
    let temp = tempdir().expect("tempdir");
    let backend = LocalBackend::open(temp.path()).expect("open backend");
    let ana = backend.sign_up("ana@example.com", "hunter22").expect("sign up");
    backend.create(&ana.uid, new_task("Ana's")).expect("create");

    let bo = backend.sign_up("bo@example.com", "hunter22").expect("sign up");
    assert!(matches!(
        backend.create(&ana.uid, new_task("intrusion")),
        Err(OperationError::PermissionDenied { .. })
    ));
    assert!(
        backend
            .subscribe(&ana.uid, Arc::new(|_: Vec<Task>| {}))
            .is_err()
    );

    backend.sign_out().expect("sign out");
    assert!(backend.create(&bo.uid, new_task("signed out")).is_err());
    assert!(backend.create(&UserId::new("nobody"), new_task("x")).is_err());
}

#[test]
fn session_and_tasks_survive_reopen() {
    let temp = tempdir().expect("tempdir");
    let uid = {
        let backend = LocalBackend::open(temp.path()).expect("open backend");
        let principal = backend.sign_up("ana@example.com", "hunter22").expect("sign up");
        backend.create(&principal.uid, new_task("Persisted")).expect("create");
        principal.uid
    };

    let backend = LocalBackend::open(temp.path()).expect("reopen backend");
    assert_eq!(
        backend.current_principal().map(|p| p.uid),
        Some(uid.clone())
    );

    let seen: Arc<Mutex<Vec<Task>>> = Arc::default();
    let sink = seen.clone();
    let _sub = backend
        .subscribe(&uid, Arc::new(move |snapshot: Vec<Task>| *sink.lock() = snapshot))
        .expect("subscribe");
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(seen.lock()[0].title, "Persisted");

    backend.sign_out().expect("sign out");
    let backend = LocalBackend::open(temp.path()).expect("reopen backend");
    assert!(backend.current_principal().is_none());
    backend.sign_in("ana@example.com", "hunter22").expect("sign in");
}

#[test]
fn failed_account_write_does_not_create_the_account() {
    let temp = tempdir().expect("tempdir");
    let backend = LocalBackend::open(temp.path()).expect("open backend");
    std::fs::create_dir(temp.path().join("accounts.json")).expect("block accounts file");

    let err = backend.sign_up("ana@example.com", "hunter22").unwrap_err();
    assert!(err.message().starts_with("account storage unavailable"));
    assert!(backend.current_principal().is_none());

    let err = backend.sign_in("ana@example.com", "hunter22").unwrap_err();
    assert_eq!(err.message(), "invalid credentials");

    std::fs::remove_dir(temp.path().join("accounts.json")).expect("unblock");
    backend
        .sign_up("ana@example.com", "hunter22")
        .expect("sign up once storage is back");
}

#[test]
fn failed_sign_out_keeps_backend_and_view_in_step() {
    let temp = tempdir().expect("tempdir");
    let local = LocalBackend::open(temp.path()).expect("open backend");
    let principal = local.sign_up("ana@example.com", "hunter22").expect("sign up");

    let backend = Backend::from_local(local.clone());
    let vm = ViewModel::new(Capability::Interactive, move || Ok(backend));
    assert_eq!(vm.current_user().map(|p| p.uid), Some(principal.uid.clone()));

    let session_file = temp.path().join("session.json");
    std::fs::remove_file(&session_file).expect("remove session file");
    std::fs::create_dir(&session_file).expect("block session file");

    vm.logout();
    let notice = vm.take_notice().expect("failure is reported");
    assert!(notice.contains("could not sign out"));
    assert_eq!(
        local.current_principal().map(|p| p.uid),
        Some(principal.uid.clone())
    );
    assert_eq!(vm.current_user().map(|p| p.uid), Some(principal.uid.clone()));

    vm.set_new_task_title("Still signed in");
    vm.add_task();
    assert!(vm.take_notice().is_none());
    assert_eq!(vm.count(TaskFilter::All), 1);
}

#[test]
fn corrupt_state_is_an_initialization_error() {
    let temp = tempdir().expect("tempdir");
    std::fs::write(temp.path().join("accounts.json"), "{ nope").expect("write");
    assert!(matches!(
        LocalBackend::open(temp.path()),
        Err(InitializationError::Corrupt { .. })
    ));
}

#[test]
fn view_model_end_to_end_over_local_backend() {
    let temp = tempdir().expect("tempdir");
    let config = BackendConfig::default();
    let data_dir = temp.path().to_path_buf();
    let vm = ViewModel::new(Capability::Interactive, || {
        Backend::connect(&config, &data_dir)
    });
    assert!(vm.is_connected());
    assert_eq!(vm.state().session, SessionState::Unauthenticated);

    vm.toggle_auth_mode();
    vm.set_email("ana@example.com");
    vm.set_password("hunter22");
    vm.handle_auth();
    assert!(vm.current_user().is_some());
    assert!(vm.has_task_subscription());

    for title in ["First", "Second", "Third"] {
        vm.set_new_task_title(title);
        vm.add_task();
    }
    assert_eq!(vm.count(TaskFilter::All), 3);
    let titles: Vec<String> = vm.tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, vec!["Third", "Second", "First"]);

    let first = vm.tasks()[0].clone();
    vm.toggle_task(&first.id);
    assert_eq!(vm.count(TaskFilter::Completed), 1);
    assert_eq!(vm.count(TaskFilter::Pending), 2);

    vm.delete_task(&first.id, |_| false);
    assert_eq!(vm.count(TaskFilter::All), 3);
    vm.delete_task(&first.id, |_| true);
    assert_eq!(vm.count(TaskFilter::All), 2);
    assert_eq!(vm.count(TaskFilter::Completed), 0);

    vm.logout();
    assert!(vm.tasks().is_empty());
    assert!(!vm.has_task_subscription());

    let local = LocalBackend::open(&temp.path().join(&config.project_id)).expect("reopen");
    drop(vm);
    assert!(local.current_principal().is_none());
}

#[test]
fn dropping_view_model_unregisters_from_local_backend() {
    let temp = tempdir().expect("tempdir");
    let local = LocalBackend::open(temp.path()).expect("open backend");
    local.sign_up("ana@example.com", "hunter22").expect("sign up");

    let backend = Backend::from_local(local.clone());
    let vm = ViewModel::new(Capability::Interactive, move || Ok(backend));
    assert!(vm.has_task_subscription());
    assert_eq!(local.listener_count(), (1, 1));

    drop(vm);
    assert_eq!(local.listener_count(), (0, 0));
}

#[test]
fn front_end_delete_always_asks_first() {
    let temp = tempdir().expect("tempdir");
    let local = LocalBackend::open(temp.path()).expect("open backend");
    local.sign_up("ana@example.com", "hunter22").expect("sign up");
    let backend = Backend::from_local(local);
    let vm = ViewModel::new(Capability::Interactive, move || Ok(backend));
    vm.set_new_task_title("Keep me");
    vm.add_task();

    let mut out = Vec::new();
    let flow = dispatch(&vm, Command::Delete(1), &mut "n\n".as_bytes(), &mut out)
        .expect("dispatch");
    assert_eq!(flow, Flow::Continue);
    assert!(String::from_utf8_lossy(&out).contains(DELETE_PROMPT));
    assert_eq!(vm.count(TaskFilter::All), 1);

    let mut out = Vec::new();
    dispatch(&vm, Command::Delete(1), &mut "".as_bytes(), &mut out).expect("dispatch");
    assert!(String::from_utf8_lossy(&out).contains(DELETE_PROMPT));
    assert_eq!(vm.count(TaskFilter::All), 1);

    let mut out = Vec::new();
    dispatch(&vm, Command::Delete(1), &mut "yes\n".as_bytes(), &mut out).expect("dispatch");
    assert_eq!(vm.count(TaskFilter::All), 0);
}
