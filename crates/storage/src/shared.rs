//! Reference-counted, lazily constructed shared resources.
//!
//! [`SharedHandle`] hands out [`Lease`]s on one expensive resource (typically
//! a network client) to any number of unrelated callers. The resource is
//! constructed by the first opener that needs it and closed by whichever
//! caller releases the last outstanding lease. The next `open` after that
//! starts a fresh generation with a new resource.
//!
//! # Epochs
//!
//! The handle holds an atomically swappable pointer to an *epoch*: a holder
//! count plus a lazily initialized resource slot. No mutex is held across
//! resource construction or close.
//!
//! ```text
//!   open():    load epoch ──► count += 1 unless RETIRED ──► realize resource
//!                  ▲                  │ retired
//!                  └──── reload ◄─────┘
//!
//!   release(): count -= 1; when it was 1, count := RETIRED
//!              └─► swap in a fresh epoch ──► close the old resource
//! ```
//!
//! The holder count moves from 1 to `RETIRED` in a single compare-and-swap,
//! so once the last holder has committed to closing, no opener can join that
//! epoch. Openers that observe `RETIRED` reload the pointer and retry against
//! the replacement, which is installed before the old resource is closed.
//! An opener therefore never waits on a close.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

use crate::error::{StorageError, StorageResult};

/// Holder-count marker of an epoch whose last lease has been released.
const RETIRED: usize = usize::MAX;

/// A resource that can be shared between leases and closed once.
#[async_trait]
pub trait SharedResource: Send + Sync + 'static {
    /// Closes the resource. Called exactly once per constructed instance.
    async fn close(&self) -> StorageResult<()>;
}

/// Constructs instances of a [`SharedResource`].
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The resource type produced by this factory.
    type Resource: SharedResource;

    /// Builds a new resource instance.
    async fn create(&self) -> StorageResult<Self::Resource>;
}

/// Adapts an async closure into a [`ResourceFactory`].
///
/// # Example
///
/// ```no_run
/// use tablekv_storage::{FnFactory, SharedHandle, SharedResource, StorageError, StorageResult};
///
/// struct Client;
///
/// #[async_trait::async_trait]
/// impl SharedResource for Client {
///     async fn close(&self) -> StorageResult<()> {
///         Ok(())
///     }
/// }
///
/// let handle = SharedHandle::new(FnFactory::new(|| async { Ok::<_, StorageError>(Client) }));
/// ```
pub struct FnFactory<F>(F);

impl<F> FnFactory<F> {
    /// Wraps `f`, which is called once per constructed resource.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut, R> ResourceFactory for FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StorageResult<R>> + Send + 'static,
    R: SharedResource,
{
    type Resource = R;

    async fn create(&self) -> StorageResult<R> {
        (self.0)().await
    }
}

/// One generation of the shared resource.
struct Epoch<R> {
    generation: u64,
    holders: AtomicUsize,
    resource: OnceCell<Arc<R>>,
}

impl<R> Epoch<R> {
    fn new(generation: u64) -> Self {
        Self { generation, holders: AtomicUsize::new(0), resource: OnceCell::new() }
    }

    /// Registers one more holder unless the epoch has been retired.
    fn try_retain(&self) -> bool {
        self.holders
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n != RETIRED).then(|| n + 1))
            .is_ok()
    }
}

struct Inner<R: SharedResource> {
    current: ArcSwap<Epoch<R>>,
    factory: Box<dyn ResourceFactory<Resource = R>>,
    next_generation: AtomicU64,
}

/// Lock-free, reference-counted handle to a lazily constructed resource.
///
/// Cloning the handle is cheap; clones share the same epochs.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// use tablekv_storage::{FnFactory, SharedHandle, SharedResource, StorageError, StorageResult};
///
/// struct Client;
///
/// #[async_trait::async_trait]
/// impl SharedResource for Client {
///     async fn close(&self) -> StorageResult<()> {
///         Ok(())
///     }
/// }
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let built = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&built);
/// let handle = SharedHandle::new(FnFactory::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
///     async { Ok::<_, StorageError>(Client) }
/// }));
///
/// let a = handle.open().await.unwrap();
/// let b = handle.open().await.unwrap();
/// assert!(Arc::ptr_eq(a.resource(), b.resource()));
/// assert_eq!(built.load(Ordering::SeqCst), 1);
///
/// a.release().await.unwrap();
/// b.release().await.unwrap(); // last lease: the client is closed here
/// # });
/// ```
pub struct SharedHandle<R: SharedResource> {
    inner: Arc<Inner<R>>,
}

impl<R: SharedResource> Clone for SharedHandle<R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<R: SharedResource> fmt::Debug for SharedHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let epoch = self.inner.current.load();
        f.debug_struct("SharedHandle")
            .field("generation", &epoch.generation)
            .field("holders", &epoch.holders.load(Ordering::Acquire))
            .field("realized", &epoch.resource.initialized())
            .finish()
    }
}

impl<R: SharedResource> SharedHandle<R> {
    /// Creates a handle whose resources are built by `factory`.
    ///
    /// Nothing is constructed until the first [`open`](Self::open).
    pub fn new<F>(factory: F) -> Self
    where
        F: ResourceFactory<Resource = R>,
    {
        Self {
            inner: Arc::new(Inner {
                current: ArcSwap::from_pointee(Epoch::new(0)),
                factory: Box::new(factory),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Acquires a lease on the current resource, constructing it if this is
    /// the first lease of its generation.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error if construction fails. The generation
    /// stays unrealized, so a later `open` retries construction.
    pub async fn open(&self) -> StorageResult<Lease<R>> {
        let epoch = self.retain_current();

        let realized = epoch
            .resource
            .get_or_try_init(|| async {
                debug!(generation = epoch.generation, "Constructing shared resource");
                self.inner.factory.create().await.map(Arc::new)
            })
            .await;

        let resource = match realized {
            Ok(resource) => Arc::clone(resource),
            Err(err) => {
                if let Err(release_err) = self.release_epoch(&epoch).await {
                    warn!(
                        generation = epoch.generation,
                        error = %release_err,
                        "Failed to release lease after construction error",
                    );
                }
                return Err(err);
            },
        };

        Ok(Lease { handle: self.clone(), epoch, resource })
    }

    /// Releases a lease.
    ///
    /// If it was the last outstanding lease of its generation, the resource
    /// is closed and the next [`open`](Self::open) starts a new generation.
    ///
    /// # Errors
    ///
    /// Returns the resource's close error to the caller that released the
    /// last lease. Close is not retried.
    pub async fn release(&self, lease: Lease<R>) -> StorageResult<()> {
        let Lease { epoch, resource, .. } = lease;
        drop(resource);
        self.release_epoch(&epoch).await
    }

    /// Returns the generation number of the current epoch.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.current.load().generation
    }

    /// Returns the number of outstanding leases on the current epoch.
    #[must_use]
    pub fn holders(&self) -> usize {
        match self.inner.current.load().holders.load(Ordering::Acquire) {
            RETIRED => 0,
            n => n,
        }
    }

    /// Returns `true` if the current epoch has a constructed resource.
    #[must_use]
    pub fn is_realized(&self) -> bool {
        self.inner.current.load().resource.initialized()
    }

    fn retain_current(&self) -> Arc<Epoch<R>> {
        loop {
            let epoch = self.inner.current.load_full();
            if epoch.try_retain() {
                return epoch;
            }
            // Retired by a concurrent final release; its replacement is
            // installed right after the retirement.
            std::hint::spin_loop();
        }
    }

    async fn release_epoch(&self, epoch: &Arc<Epoch<R>>) -> StorageResult<()> {
        let previous =
            epoch.holders.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                0 | RETIRED => None,
                1 => Some(RETIRED),
                n => Some(n - 1),
            });

        match previous {
            Ok(1) => self.retire(epoch).await,
            Ok(_) => Ok(()),
            Err(holders) => {
                error!(
                    generation = epoch.generation,
                    holders, "Released more leases than were opened"
                );
                Err(StorageError::internal(format!(
                    "lease released on generation {} with no outstanding holders",
                    epoch.generation
                )))
            },
        }
    }

    async fn retire(&self, epoch: &Arc<Epoch<R>>) -> StorageResult<()> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.current.compare_and_swap(epoch, Arc::new(Epoch::new(generation)));
        if !Arc::ptr_eq(&*previous, epoch) {
            error!(generation = epoch.generation, "Retired epoch was not the current epoch");
            return Err(StorageError::internal(format!(
                "generation {} retired while not current",
                epoch.generation
            )));
        }

        match epoch.resource.get() {
            Some(resource) => {
                debug!(generation = epoch.generation, "Closing shared resource");
                resource.close().await
            },
            None => Ok(()),
        }
    }
}

/// A live reference to the resource of one generation.
///
/// A lease must be handed back through [`SharedHandle::release`] (or
/// [`Lease::release`]) exactly once; it is consumed on release. A lease that
/// is dropped without being released keeps its generation alive.
pub struct Lease<R: SharedResource> {
    handle: SharedHandle<R>,
    epoch: Arc<Epoch<R>>,
    resource: Arc<R>,
}

impl<R: SharedResource> Lease<R> {
    /// Returns the leased resource.
    #[must_use]
    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    /// Returns the generation this lease belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.epoch.generation
    }

    /// Releases this lease on the handle it was opened from.
    ///
    /// # Errors
    ///
    /// See [`SharedHandle::release`].
    pub async fn release(self) -> StorageResult<()> {
        let handle = self.handle.clone();
        handle.release(self).await
    }
}

impl<R: SharedResource> fmt::Debug for Lease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("generation", &self.epoch.generation).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use tokio::task::JoinSet;

    use super::*;

    #[derive(Default)]
    struct Stats {
        created: AtomicUsize,
        closed: AtomicUsize,
        fail_create: AtomicBool,
        fail_close: AtomicBool,
    }

    struct Probe {
        id: usize,
        closed: AtomicBool,
        stats: Arc<Stats>,
    }

    #[async_trait]
    impl SharedResource for Probe {
        async fn close(&self) -> StorageResult<()> {
            assert!(!self.closed.swap(true, Ordering::SeqCst), "probe {} closed twice", self.id);
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
            if self.stats.fail_close.load(Ordering::SeqCst) {
                return Err(StorageError::connection("close failed"));
            }
            Ok(())
        }
    }

    struct ProbeFactory {
        stats: Arc<Stats>,
    }

    #[async_trait]
    impl ResourceFactory for ProbeFactory {
        type Resource = Probe;

        async fn create(&self) -> StorageResult<Probe> {
            if self.stats.fail_create.load(Ordering::SeqCst) {
                return Err(StorageError::connection("endpoint unreachable"));
            }
            let id = self.stats.created.fetch_add(1, Ordering::SeqCst);
            Ok(Probe { id, closed: AtomicBool::new(false), stats: Arc::clone(&self.stats) })
        }
    }

    fn probe_handle() -> (SharedHandle<Probe>, Arc<Stats>) {
        let stats = Arc::new(Stats::default());
        (SharedHandle::new(ProbeFactory { stats: Arc::clone(&stats) }), stats)
    }

    #[tokio::test]
    async fn test_nothing_constructed_before_open() {
        let (handle, stats) = probe_handle();
        assert!(!handle.is_realized());
        assert_eq!(handle.holders(), 0);
        assert_eq!(stats.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_leases_share_one_instance() {
        let (handle, stats) = probe_handle();

        let a = handle.open().await.unwrap();
        let b = handle.open().await.unwrap();

        assert!(Arc::ptr_eq(a.resource(), b.resource()));
        assert_eq!(a.generation(), b.generation());
        assert_eq!(handle.holders(), 2);
        assert_eq!(stats.created.load(Ordering::SeqCst), 1);

        handle.release(a).await.unwrap();
        assert_eq!(stats.closed.load(Ordering::SeqCst), 0, "one lease is still outstanding");

        handle.release(b).await.unwrap();
        assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_after_full_release_starts_new_generation() {
        let (handle, stats) = probe_handle();

        let first = handle.open().await.unwrap();
        let first_id = first.resource().id;
        let first_generation = first.generation();
        first.release().await.unwrap();

        assert!(!handle.is_realized());
        assert_ne!(handle.generation(), first_generation);

        let second = handle.open().await.unwrap();
        assert_ne!(second.resource().id, first_id);
        assert_eq!(stats.created.load(Ordering::SeqCst), 2);
        second.release().await.unwrap();
        assert_eq!(stats.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_construction_failure_leaves_epoch_unrealized() {
        let (handle, stats) = probe_handle();
        stats.fail_create.store(true, Ordering::SeqCst);

        let err = handle.open().await.unwrap_err();
        assert!(matches!(err, StorageError::Connection { .. }));
        assert_eq!(handle.holders(), 0);
        assert!(!handle.is_realized());

        stats.fail_create.store(false, Ordering::SeqCst);
        let lease = handle.open().await.unwrap();
        assert_eq!(stats.created.load(Ordering::SeqCst), 1);
        lease.release().await.unwrap();
        assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_failure_surfaces_to_last_releaser() {
        let (handle, stats) = probe_handle();
        stats.fail_close.store(true, Ordering::SeqCst);

        let a = handle.open().await.unwrap();
        let b = handle.open().await.unwrap();

        assert!(a.release().await.is_ok());
        let err = b.release().await.unwrap_err();
        assert!(matches!(err, StorageError::Connection { .. }));
        assert_eq!(stats.closed.load(Ordering::SeqCst), 1, "close is not retried");

        // The handle still moves on to a fresh generation.
        stats.fail_close.store(false, Ordering::SeqCst);
        let c = handle.open().await.unwrap();
        assert_eq!(stats.created.load(Ordering::SeqCst), 2);
        c.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_fn_factory() {
        let stats = Arc::new(Stats::default());
        let factory_stats = Arc::clone(&stats);
        let handle = SharedHandle::new(FnFactory::new(move || {
            let stats = Arc::clone(&factory_stats);
            async move {
                let id = stats.created.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StorageError>(Probe { id, closed: AtomicBool::new(false), stats })
            }
        }));

        let lease = handle.open().await.unwrap();
        assert_eq!(lease.resource().id, 0);
        lease.release().await.unwrap();
        assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_open_release_closes_every_instance_once() {
        let (handle, stats) = probe_handle();

        let mut tasks = JoinSet::new();
        for _ in 0..32 {
            let handle = handle.clone();
            tasks.spawn(async move {
                for _ in 0..50 {
                    let lease = handle.open().await.expect("open");
                    assert!(!lease.resource().closed.load(Ordering::SeqCst), "leased a closed probe");
                    tokio::task::yield_now().await;
                    assert!(!lease.resource().closed.load(Ordering::SeqCst), "probe closed under lease");
                    lease.release().await.expect("release");
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.expect("task should not panic");
        }

        assert_eq!(handle.holders(), 0);
        assert_eq!(
            stats.created.load(Ordering::SeqCst),
            stats.closed.load(Ordering::SeqCst),
            "every constructed instance is closed exactly once"
        );
    }
}
