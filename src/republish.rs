//! Bulk republication of stored certificates.
//!
//! One producer pages the store for serials and feeds a bounded queue; a
//! configurable number of consumers fetch each certificate and hand it to
//! every interested publisher. Termination is guaranteed by an
//! end-of-queue sentinel that every consumer re-injects before exiting,
//! so the sentinel reaches all of them even on failure or stop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::issuance::CertPublisher;
use crate::store::CertStore;
use crate::types::{NameId, SerialWithId};

enum QueueEntry {
    Serial(SerialWithId),
    EndOfQueue,
}

pub struct CertRepublisher {
    ca: NameId,
    store: Arc<CertStore>,
    publishers: Vec<Arc<dyn CertPublisher>>,
    only_revoked_certs: bool,
    num_threads: usize,
    stop: Arc<AtomicBool>,
}

impl CertRepublisher {
    pub fn new(
        ca: NameId,
        store: Arc<CertStore>,
        publishers: Vec<Arc<dyn CertPublisher>>,
        only_revoked_certs: bool,
        num_threads: usize,
    ) -> Self {
        Self {
            ca,
            store,
            publishers,
            only_revoked_certs,
            num_threads: num_threads.max(1),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative stop; consumers finish their current certificate.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the republication. Returns whether every certificate was
    /// published successfully.
    pub fn republish(&self) -> bool {
        let total = match self.store.get_count_of_certs(&self.ca, self.only_revoked_certs) {
            Ok(total) => total,
            Err(err) => {
                error!(ca = %self.ca.name, "could not count certificates: {err}");
                return false;
            }
        };
        info!(ca = %self.ca.name, total, "republication started");

        let (tx, rx) = sync_channel::<QueueEntry>(1000);
        let rx = Arc::new(Mutex::new(rx));
        // queue-level errors abort the run; publish failures only mark it
        let failed = AtomicBool::new(false);
        let publish_failures = AtomicUsize::new(0);
        let processed = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            let producer_tx = tx.clone();
            scope.spawn(|| self.produce(producer_tx, &failed));
            for _ in 0..self.num_threads {
                let rx = Arc::clone(&rx);
                let tx = tx.clone();
                scope.spawn(|| self.consume(rx, tx, &failed, &publish_failures, &processed));
            }
        });

        let ok = !failed.load(Ordering::SeqCst) && publish_failures.load(Ordering::SeqCst) == 0;
        info!(
            ca = %self.ca.name,
            processed = processed.load(Ordering::SeqCst),
            publish_failures = publish_failures.load(Ordering::SeqCst),
            successful = ok,
            "republication finished"
        );
        ok
    }

    fn produce(&self, tx: SyncSender<QueueEntry>, failed: &AtomicBool) {
        let page = 100;
        let mut start_id = 1i64;
        loop {
            if failed.load(Ordering::SeqCst) || self.stop.load(Ordering::SeqCst) {
                break;
            }
            let serials = match self.store.get_serial_numbers(
                &self.ca,
                start_id,
                page,
                self.only_revoked_certs,
            ) {
                Ok(serials) => serials,
                Err(err) => {
                    error!("republish producer failed: {err}");
                    failed.store(true, Ordering::SeqCst);
                    break;
                }
            };
            let n = serials.len();
            for serial in serials {
                if serial.id >= start_id {
                    start_id = serial.id + 1;
                }
                if tx.send(QueueEntry::Serial(serial)).is_err() {
                    failed.store(true, Ordering::SeqCst);
                    break;
                }
            }
            if n < page {
                break;
            }
        }
        // consumers re-inject the sentinel for each other
        let _ = tx.send(QueueEntry::EndOfQueue);
    }

    fn consume(
        &self,
        rx: Arc<Mutex<Receiver<QueueEntry>>>,
        tx: SyncSender<QueueEntry>,
        failed: &AtomicBool,
        publish_failures: &AtomicUsize,
        processed: &AtomicUsize,
    ) {
        loop {
            let entry = {
                let Ok(guard) = rx.lock() else {
                    failed.store(true, Ordering::SeqCst);
                    break;
                };
                guard.recv()
            };
            let serial = match entry {
                Ok(QueueEntry::Serial(serial)) => serial,
                Ok(QueueEntry::EndOfQueue) => {
                    let _ = tx.send(QueueEntry::EndOfQueue);
                    break;
                }
                Err(_) => break,
            };

            if failed.load(Ordering::SeqCst) || self.stop.load(Ordering::SeqCst) {
                continue;
            }

            let cert_info = match self.store.get_cert_for_id(serial.id) {
                Ok(Some(info)) => info,
                Ok(None) => continue,
                Err(err) => {
                    error!("republish lookup failed: {err}");
                    failed.store(true, Ordering::SeqCst);
                    continue;
                }
            };

            let mut all_succeeded = true;
            for publisher in &self.publishers {
                if cert_info.rev_info.is_none() && !publisher.publishes_good_certs() {
                    continue;
                }
                if !publisher.certificate_added(&cert_info) {
                    warn!(
                        serial = %serial.serial,
                        publisher = %publisher.ident().name,
                        "republication of certificate failed"
                    );
                    all_succeeded = false;
                }
            }
            // a publisher refusing one certificate marks the run failed
            // but does not stop the queue
            if all_succeeded {
                processed.fetch_add(1, Ordering::SeqCst);
            } else {
                publish_failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CertInfo;
    use std::sync::atomic::AtomicUsize;

    struct CountingPublisher {
        ident: NameId,
        published: AtomicUsize,
        fail_after: Option<usize>,
    }

    impl CertPublisher for CountingPublisher {
        fn ident(&self) -> &NameId {
            &self.ident
        }

        fn publishes_good_certs(&self) -> bool {
            true
        }

        fn certificate_added(&self, _cert: &CertInfo) -> bool {
            let n = self.published.fetch_add(1, Ordering::SeqCst);
            match self.fail_after {
                Some(limit) => n < limit,
                None => true,
            }
        }
    }

    fn setup() -> (Arc<CertStore>, NameId) {
        let generator = Arc::new(crate::uid::UniqueIdGenerator::new(0, 1).unwrap());
        let store = Arc::new(CertStore::open_in_memory(generator).unwrap());
        (store, NameId::new(1, "test-ca"))
    }

    fn seed_certs(store: &CertStore, ca: &NameId, count: u64) {
        let profile = NameId::new(1, "tls");
        let requestor = NameId::new(1, "ra");
        for serial in 1..=count {
            let cert = crate::store::tests::fake_cert(
                serial,
                &format!("CN=repub-{serial}"),
                1_700_000_000,
                1_800_000_000,
            );
            store
                .add_cert(ca, &cert, &profile, &requestor, None, crate::types::RequestType::Ca, None, None)
                .unwrap();
        }
    }

    fn counting_publisher(fail_after: Option<usize>) -> Arc<CountingPublisher> {
        Arc::new(CountingPublisher {
            ident: NameId::new(1, "p1"),
            published: AtomicUsize::new(0),
            fail_after,
        })
    }

    #[test]
    fn empty_store_republishes_successfully() {
        let (store, ca) = setup();
        let publisher = counting_publisher(None);
        let republisher =
            CertRepublisher::new(ca, store, vec![publisher.clone()], false, 3);
        assert!(republisher.republish());
        assert_eq!(publisher.published.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn republishes_every_stored_certificate() {
        let (store, ca) = setup();
        seed_certs(&store, &ca, 5);

        let publisher = counting_publisher(None);
        let republisher =
            CertRepublisher::new(ca, store, vec![publisher.clone()], false, 2);
        assert!(republisher.republish());
        assert_eq!(publisher.published.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn publish_failure_marks_the_run_but_keeps_going() {
        let (store, ca) = setup();
        seed_certs(&store, &ca, 5);

        // the publisher accepts two certificates, then refuses the rest
        let publisher = counting_publisher(Some(2));
        let republisher =
            CertRepublisher::new(ca, store, vec![publisher.clone()], false, 2);
        assert!(!republisher.republish());
        // every certificate was still attempted
        assert_eq!(publisher.published.load(Ordering::SeqCst), 5);
    }
}
