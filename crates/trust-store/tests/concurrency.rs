mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use trust_store::{
    default_provider, Certificate, ConfirmationGateway, InteractionMode, PersistentTrustStore,
    SystemTrustSource, TrustDecision, TrustDecisionCoordinator, TrustOrigin,
};

use common::{evaluate, self_signed, store_path, PASSWORD};

const THREADS: usize = 8;

fn coordinator(
    dir: &TempDir,
    gateway: Arc<dyn ConfirmationGateway>,
) -> Arc<TrustDecisionCoordinator> {
    let provider = default_provider();
    let store = Arc::new(PersistentTrustStore::open_with_provider(
        store_path(dir),
        PASSWORD,
        Arc::clone(&provider),
    ));
    Arc::new(
        TrustDecisionCoordinator::new(SystemTrustSource::missing(), store, provider)
            .with_gateway(gateway)
            .with_interaction_mode(InteractionMode::Interactive),
    )
}

#[test]
fn concurrent_adds_of_distinct_certificates_all_land() {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(PersistentTrustStore::open(store_path(&dir), PASSWORD));
    let certificates: Vec<Certificate> = (0..THREADS)
        .map(|index| self_signed(&format!("host-{index}.test")))
        .collect();
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = certificates
        .iter()
        .cloned()
        .map(|certificate| {
            let store = Arc::clone(&store);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                store.add_certificate(&certificate)
            })
        })
        .collect();
    for worker in workers {
        assert!(worker.join().expect("worker join"));
    }

    assert_eq!(store.len(), THREADS);
    let reopened = PersistentTrustStore::open(store_path(&dir), PASSWORD);
    assert_eq!(reopened.len(), THREADS);
    for certificate in &certificates {
        assert_eq!(reopened.get_certificate(&certificate.alias()).as_ref(), Some(certificate));
    }
}

#[test]
fn racing_handshakes_for_one_certificate_prompt_once() {
    let dir = TempDir::new().expect("temp dir");
    let prompts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&prompts);
    let gateway = move |_: &Certificate| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        true
    };
    let coordinator = coordinator(&dir, Arc::new(gateway));
    let certificate = self_signed("shared.test");
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let certificate = certificate.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                evaluate(&coordinator, &certificate, "shared.test")
            })
        })
        .collect();
    let decisions: Vec<TrustDecision> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker join"))
        .collect();

    assert_eq!(prompts.load(Ordering::SeqCst), 1);
    assert!(decisions.iter().all(TrustDecision::is_trusted));
    let confirmed = decisions
        .iter()
        .filter(|decision| {
            **decision == TrustDecision::Trusted(TrustOrigin::Confirmed { persisted: true })
        })
        .count();
    assert_eq!(confirmed, 1);
    assert_eq!(coordinator.get_certificates(), vec![certificate]);
}

#[test]
fn different_certificates_are_confirmed_concurrently() {
    let dir = TempDir::new().expect("temp dir");
    let (signal, waiter) = mpsc::channel::<()>();
    let signal = Mutex::new(signal);
    let waiter = Mutex::new(waiter);

    // `first.test` only returns true once `second.test` has reached the
    // gateway while the first prompt is still open.
    let gateway = move |certificate: &Certificate| match certificate.alias().as_str() {
        "first.test" => waiter
            .lock()
            .recv_timeout(Duration::from_secs(5))
            .is_ok(),
        _ => {
            let _ = signal.lock().send(());
            true
        }
    };
    let coordinator = coordinator(&dir, Arc::new(gateway));
    let first = self_signed("first.test");
    let second = self_signed("second.test");

    let first_worker = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || evaluate(&coordinator, &first, "first.test"))
    };
    thread::sleep(Duration::from_millis(100));
    let second_decision = evaluate(&coordinator, &second, "second.test");
    let first_decision = first_worker.join().expect("first worker join");

    assert!(second_decision.is_trusted());
    assert_eq!(
        first_decision,
        TrustDecision::Trusted(TrustOrigin::Confirmed { persisted: true })
    );
    assert_eq!(coordinator.get_certificates().len(), 2);
}
