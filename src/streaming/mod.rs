//! Background loading and incremental disposal of node payloads.
//!
//! The thread owning a [`StreamingLoader`] calls [`StreamingLoader::update`]
//! once per frame with the current selection. Loads run on worker tasks of a
//! tokio runtime and come back through a channel drained without blocking.
//!
//! Lock order is load queue, then dispose queue. A node is in at most one of
//! the loading set, the resident map and the dispose queue.

pub mod gpu;
pub mod invalidate;
pub mod source;

use crate::config::{ConfigError, StreamingConfig};
use crate::octree::address::OctantAddress;
use crate::point::codec::PointAccessor;
use crate::point::reader::{BufferPointReader, PointReader};
use crate::point::schema::PointAttributeSchema;
use crate::streaming::gpu::GpuLayer;
use crate::streaming::invalidate::InvalidateCacheToken;
use crate::streaming::source::{LoadError, NodeSource};
use crate::visibility::Selection;
use async_channel::{Receiver, Sender, TrySendError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

/// Decoded points of a node and the mesh built from them.
#[derive(Debug)]
pub struct ResidentPayload<P, H> {
    pub points: Vec<P>,
    pub handle: H,
}

#[derive(Debug, Default)]
struct LoadQueue {
    loading: HashSet<OctantAddress>,
    failures: HashMap<OctantAddress, u32>,
}

struct LoadCompletion<P> {
    address: OctantAddress,
    result: Result<Vec<P>, LoadError>,
}

type DisposeQueue<P, H> = VecDeque<(OctantAddress, ResidentPayload<P, H>)>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct StreamingLoader<P, G: GpuLayer<P>> {
    config: StreamingConfig,
    gpu: G,
    load_queue: Arc<Mutex<LoadQueue>>,
    dispose_queue: Mutex<DisposeQueue<P, G::Handle>>,
    resident: HashMap<OctantAddress, ResidentPayload<P, G::Handle>>,
    stale: HashSet<OctantAddress>,
    requests: Sender<OctantAddress>,
    completions: Receiver<LoadCompletion<P>>,
    shutdown: Arc<AtomicBool>,
    invalidate: InvalidateCacheToken,
    workers: Vec<JoinHandle<()>>,
    scene_updated: bool,
}

impl<P, G> StreamingLoader<P, G>
where
    P: PointAccessor + Clone + Default + Send + 'static,
    G: GpuLayer<P>,
{
    /// Starts `config.worker_count` load workers on `runtime`.
    pub fn new<S: NodeSource>(
        config: StreamingConfig,
        schema: PointAttributeSchema,
        source: S,
        gpu: G,
        runtime: &Handle,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (requests, request_rx) = async_channel::bounded(config.max_nodes_per_cycle * 2);
        let (completion_tx, completions) = async_channel::unbounded();
        let load_queue = Arc::new(Mutex::new(LoadQueue::default()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let source = Arc::new(source);
        let schema = Arc::new(schema);

        let workers = (0..config.worker_count)
            .map(|worker| {
                runtime.spawn(run_worker(
                    worker,
                    source.clone(),
                    schema.clone(),
                    request_rx.clone(),
                    completion_tx.clone(),
                    load_queue.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        Ok(Self {
            config,
            gpu,
            load_queue,
            dispose_queue: Mutex::new(VecDeque::new()),
            resident: HashMap::new(),
            stale: HashSet::new(),
            requests,
            completions,
            shutdown,
            invalidate: InvalidateCacheToken::new(),
            workers,
            scene_updated: false,
        })
    }

    /// Shares an existing token instead of the loader's own.
    pub fn with_invalidate_token(mut self, token: InvalidateCacheToken) -> Self {
        self.invalidate = token;
        self
    }

    pub fn invalidate_token(&self) -> InvalidateCacheToken {
        self.invalidate.clone()
    }

    /// Runs one cycle against `selection`. Never blocks on I/O.
    #[instrument(level = "debug", skip_all, fields(visible = selection.len()))]
    pub fn update(&mut self, selection: &Selection) {
        let visible: HashSet<OctantAddress> = selection.addresses().collect();

        self.cancel_hidden_loads(&visible);
        self.drain_completions();
        self.restore_visible(&visible);
        self.schedule_loads(selection);
        self.queue_hidden(&visible);
        self.refresh_stale(selection);
        self.process_disposals();

        self.scene_updated = selection
            .addresses()
            .all(|address| self.resident.contains_key(&address));
    }

    fn cancel_hidden_loads(&mut self, visible: &HashSet<OctantAddress>) {
        let mut queue = lock(&self.load_queue);
        queue.loading.retain(|address| {
            let keep = visible.contains(address);
            if !keep {
                trace!(node = %address, "load cancelled");
            }
            keep
        });
        // a node that leaves the view starts over when it comes back
        queue.failures.retain(|address, _| visible.contains(address));
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions.try_recv() {
            let address = completion.address;
            let mut queue = lock(&self.load_queue);
            if !queue.loading.remove(&address) {
                trace!(node = %address, "dropping completion of a cancelled load");
                continue;
            }
            match completion.result {
                Ok(points) => {
                    queue.failures.remove(&address);
                    let handle = self.gpu.create_mesh(address, &points);
                    debug!(node = %address, points = points.len(), "node resident");
                    self.resident.insert(address, ResidentPayload { points, handle });
                }
                Err(error) => {
                    let attempts = queue.failures.entry(address).or_insert(0);
                    *attempts += 1;
                    warn!(node = %address, attempts = *attempts, %error, "failed to load node");
                }
            }
        }
    }

    /// Takes nodes visible again out of the dispose queue.
    fn restore_visible(&mut self, visible: &HashSet<OctantAddress>) {
        let _queue = lock(&self.load_queue);
        let mut dispose = lock(&self.dispose_queue);
        if dispose.is_empty() {
            return;
        }
        for (address, payload) in std::mem::take(&mut *dispose) {
            if visible.contains(&address) {
                trace!(node = %address, "restored from dispose queue");
                self.resident.insert(address, payload);
            } else {
                dispose.push_back((address, payload));
            }
        }
    }

    fn schedule_loads(&mut self, selection: &Selection) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let mut queue = lock(&self.load_queue);
        let mut started = 0;

        for node in &selection.nodes {
            if started == self.config.max_nodes_per_cycle {
                break;
            }
            let address = node.address;
            if self.resident.contains_key(&address) || queue.loading.contains(&address) {
                continue;
            }
            if queue
                .failures
                .get(&address)
                .is_some_and(|attempts| *attempts >= self.config.max_load_attempts)
            {
                continue;
            }

            queue.loading.insert(address);
            match self.requests.try_send(address) {
                Ok(()) => started += 1,
                Err(TrySendError::Full(_)) => {
                    queue.loading.remove(&address);
                    trace!("request queue full");
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    queue.loading.remove(&address);
                    warn!("load workers are gone");
                    break;
                }
            }
        }
    }

    fn queue_hidden(&mut self, visible: &HashSet<OctantAddress>) {
        let hidden: Vec<OctantAddress> = self
            .resident
            .keys()
            .filter(|address| !visible.contains(address))
            .copied()
            .collect();
        if hidden.is_empty() {
            return;
        }

        let _queue = lock(&self.load_queue);
        let mut dispose = lock(&self.dispose_queue);
        for address in hidden {
            if let Some(payload) = self.resident.remove(&address) {
                self.stale.remove(&address);
                dispose.push_back((address, payload));
            }
        }
    }

    fn refresh_stale(&mut self, selection: &Selection) {
        if self.invalidate.take() {
            debug!(nodes = self.resident.len(), "render cache invalidated");
            self.stale.extend(self.resident.keys().copied());
        }
        if self.stale.is_empty() {
            return;
        }

        let mut refreshed = 0;
        for node in &selection.nodes {
            if refreshed == self.config.max_nodes_per_cycle {
                break;
            }
            if !self.stale.remove(&node.address) {
                continue;
            }
            if let Some(payload) = self.resident.get_mut(&node.address) {
                self.gpu.update_mesh(node.address, &mut payload.handle, &payload.points);
                refreshed += 1;
            }
        }
    }

    /// Releases the configured fraction of the dispose queue and returns how
    /// many nodes were disposed.
    pub fn process_disposals(&mut self) -> usize {
        let mut dispose = lock(&self.dispose_queue);
        let count = self.config.disposals_per_cycle(dispose.len());
        for _ in 0..count {
            let Some((address, payload)) = dispose.pop_front() else {
                break;
            };
            debug!(node = %address, "disposing node");
            self.gpu.dispose_mesh(address, payload.handle);
        }
        count
    }

    /// True once every node of the last selection is resident.
    pub fn was_scene_updated(&self) -> bool {
        self.scene_updated
    }

    /// Payload of a resident node. A miss means the node is not renderable yet.
    pub fn resident(&self, address: OctantAddress) -> Option<&ResidentPayload<P, G::Handle>> {
        self.resident.get(&address)
    }

    pub fn resident_addresses(&self) -> impl Iterator<Item = OctantAddress> + '_ {
        self.resident.keys().copied()
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn is_loading(&self, address: OctantAddress) -> bool {
        lock(&self.load_queue).loading.contains(&address)
    }

    pub fn loading_count(&self) -> usize {
        lock(&self.load_queue).loading.len()
    }

    pub fn queued_for_disposal(&self) -> usize {
        lock(&self.dispose_queue).len()
    }

    pub fn failed_attempts(&self, address: OctantAddress) -> u32 {
        lock(&self.load_queue)
            .failures
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Makes nodes that reached the attempt limit eligible again.
    pub fn reset_failures(&self) {
        lock(&self.load_queue).failures.clear();
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Stops the workers once their current load is done, then releases
    /// every mesh still held.
    pub async fn shutdown(mut self) {
        self.stop_workers();
        for result in futures::future::join_all(std::mem::take(&mut self.workers)).await {
            if let Err(error) = result {
                warn!(%error, "load worker failed");
            }
        }

        lock(&self.load_queue).loading.clear();
        let queued = std::mem::take(&mut *lock(&self.dispose_queue));
        let resident = std::mem::take(&mut self.resident);
        for (address, payload) in queued.into_iter().chain(resident) {
            self.gpu.dispose_mesh(address, payload.handle);
        }
        self.stale.clear();
        debug!("streaming loader shut down");
    }

    fn stop_workers(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.requests.close();
    }
}

impl<P, G: GpuLayer<P>> Drop for StreamingLoader<P, G> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.requests.close();
    }
}

async fn run_worker<P, S>(
    worker: usize,
    source: Arc<S>,
    schema: Arc<PointAttributeSchema>,
    requests: Receiver<OctantAddress>,
    completions: Sender<LoadCompletion<P>>,
    load_queue: Arc<Mutex<LoadQueue>>,
    shutdown: Arc<AtomicBool>,
) where
    P: PointAccessor + Clone + Default + Send + 'static,
    S: NodeSource,
{
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        let Ok(address) = requests.recv().await else {
            break;
        };
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        if !lock(&load_queue).loading.contains(&address) {
            continue;
        }

        trace!(worker, node = %address, "loading node");
        let result = match source.load_node(address).await {
            Ok(bytes) => BufferPointReader::new(PointAttributeSchema::clone(&schema), bytes)
                .read_all::<P>()
                .map_err(LoadError::from),
            Err(error) => Err(error),
        };
        if completions.send(LoadCompletion { address, result }).await.is_err() {
            break;
        }
    }
    debug!(worker, "load worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::codec::encode_points;
    use crate::point::types::PosD3;
    use crate::visibility::VisibleNode;
    use async_trait::async_trait;
    use glam::DVec3;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct GpuLog {
        created: Vec<OctantAddress>,
        updated: Vec<OctantAddress>,
        disposed: Vec<(OctantAddress, u32)>,
    }

    #[derive(Default)]
    struct RecordingGpu {
        next: u32,
        log: Arc<Mutex<GpuLog>>,
    }

    impl GpuLayer<PosD3> for RecordingGpu {
        type Handle = u32;

        fn create_mesh(&mut self, address: OctantAddress, _points: &[PosD3]) -> u32 {
            self.next += 1;
            self.log.lock().unwrap().created.push(address);
            self.next
        }

        fn update_mesh(&mut self, address: OctantAddress, _handle: &mut u32, _points: &[PosD3]) {
            self.log.lock().unwrap().updated.push(address);
        }

        fn dispose_mesh(&mut self, address: OctantAddress, handle: u32) {
            self.log.lock().unwrap().disposed.push((address, handle));
        }
    }

    /// Serves one point per node, failing for addresses in `broken` and
    /// cutting the last byte off the payload of addresses in `truncated`.
    struct TestSource {
        broken: HashSet<OctantAddress>,
        truncated: HashSet<OctantAddress>,
    }

    #[async_trait]
    impl NodeSource for TestSource {
        async fn load_node(&self, address: OctantAddress) -> Result<Vec<u8>, LoadError> {
            if self.broken.contains(&address) {
                return Err(LoadError::NodeNotFound(address));
            }
            let point = PosD3 {
                position: DVec3::splat(address.depth() as f64),
            };
            let mut bytes = encode_points(&PosD3::KIND.schema(), &[point])?;
            if self.truncated.contains(&address) {
                bytes.pop();
            }
            Ok(bytes)
        }
    }

    type TestLoader = StreamingLoader<PosD3, RecordingGpu>;

    fn address(name: &str) -> OctantAddress {
        OctantAddress::from_path_string(name).unwrap()
    }

    fn selection(names: &[&str]) -> Selection {
        let nodes: Vec<VisibleNode> = names
            .iter()
            .enumerate()
            .map(|(i, name)| VisibleNode {
                address: address(name),
                projected_size: 100.0 - i as f64,
                num_points: 1,
            })
            .collect();
        Selection {
            visible_points: nodes.len() as u64,
            nodes,
            min_projected_size: 0.0,
        }
    }

    fn loader(config: StreamingConfig, broken: &[&str]) -> (TestLoader, Arc<Mutex<GpuLog>>) {
        loader_with(config, broken, &[])
    }

    fn loader_with(config: StreamingConfig, broken: &[&str], truncated: &[&str]) -> (TestLoader, Arc<Mutex<GpuLog>>) {
        let gpu = RecordingGpu::default();
        let log = gpu.log.clone();
        let source = TestSource {
            broken: broken.iter().map(|name| address(name)).collect(),
            truncated: truncated.iter().map(|name| address(name)).collect(),
        };
        let loader = StreamingLoader::new(config, PosD3::KIND.schema(), source, gpu, &Handle::current()).unwrap();
        (loader, log)
    }

    async fn settle(loader: &mut TestLoader, selection: &Selection) {
        for _ in 0..400 {
            loader.update(selection);
            if loader.was_scene_updated() && loader.loading_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("selection never became resident");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn visible_nodes_become_resident() {
        let (mut loader, log) = loader(StreamingConfig::default(), &[]);
        let visible = selection(&["r", "r0", "r1", "r2", "r3", "r4", "r5"]);

        loader.update(&visible);
        assert_eq!(loader.loading_count(), 5);
        assert!(loader.is_loading(OctantAddress::ROOT));
        assert!(!loader.is_loading(address("r5")));
        assert!(!loader.was_scene_updated());

        settle(&mut loader, &visible).await;
        for node in visible.addresses() {
            let payload = loader.resident(node).unwrap();
            assert_eq!(payload.points[0].position.x, node.depth() as f64);
        }
        assert_eq!(log.lock().unwrap().created.len(), 7);
        loader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hidden_nodes_are_disposed_once() {
        let config = StreamingConfig {
            disposal_rate: 1.0,
            ..Default::default()
        };
        let (mut loader, log) = loader(config, &[]);
        settle(&mut loader, &selection(&["r", "r0", "r1"])).await;

        loader.update(&selection(&["r"]));
        assert_eq!(loader.resident_count(), 1);
        assert_eq!(loader.queued_for_disposal(), 0);
        let mut disposed: Vec<OctantAddress> = log.lock().unwrap().disposed.iter().map(|(a, _)| *a).collect();
        disposed.sort();
        assert_eq!(disposed, [address("r0"), address("r1")]);

        loader.update(&selection(&["r"]));
        assert_eq!(log.lock().unwrap().disposed.len(), 2);
        loader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disposal_is_incremental() {
        let config = StreamingConfig {
            disposal_rate: 0.5,
            ..Default::default()
        };
        let (mut loader, log) = loader(config, &[]);
        settle(&mut loader, &selection(&["r", "r0", "r1", "r2", "r3"])).await;

        loader.update(&selection(&["r"]));
        assert_eq!(log.lock().unwrap().disposed.len(), 2);
        assert_eq!(loader.queued_for_disposal(), 2);
        loader.update(&selection(&["r"]));
        assert_eq!(loader.queued_for_disposal(), 1);
        loader.update(&selection(&["r"]));
        assert_eq!(loader.queued_for_disposal(), 0);
        assert_eq!(log.lock().unwrap().disposed.len(), 4);
        loader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_nodes_come_back_when_visible_again() {
        let config = StreamingConfig {
            disposal_rate: 0.0,
            ..Default::default()
        };
        let (mut loader, log) = loader(config, &[]);
        let both = selection(&["r", "r0"]);
        settle(&mut loader, &both).await;

        loader.update(&selection(&["r"]));
        assert_eq!(loader.queued_for_disposal(), 1);
        assert!(loader.resident(address("r0")).is_none());

        loader.update(&both);
        assert_eq!(loader.queued_for_disposal(), 0);
        assert!(loader.was_scene_updated());
        assert_eq!(log.lock().unwrap().created.len(), 2);
        assert!(log.lock().unwrap().disposed.is_empty());
        loader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_nodes_stop_after_the_attempt_limit() {
        let config = StreamingConfig {
            max_load_attempts: 2,
            ..Default::default()
        };
        let (mut loader, _log) = loader(config, &["r3"]);
        let visible = selection(&["r", "r3"]);

        for _ in 0..400 {
            loader.update(&visible);
            if loader.failed_attempts(address("r3")) == 2 && loader.loading_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(loader.failed_attempts(address("r3")), 2);
        assert!(loader.resident(OctantAddress::ROOT).is_some());
        assert!(!loader.was_scene_updated());

        loader.update(&visible);
        assert!(!loader.is_loading(address("r3")));

        loader.reset_failures();
        loader.update(&visible);
        assert!(loader.is_loading(address("r3")));
        loader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn truncated_payloads_count_as_failed_loads() {
        let config = StreamingConfig {
            max_load_attempts: 1,
            ..Default::default()
        };
        let (mut loader, log) = loader_with(config, &[], &["r5"]);
        let visible = selection(&["r", "r5"]);

        for _ in 0..400 {
            loader.update(&visible);
            if loader.failed_attempts(address("r5")) == 1 && loader.loading_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(loader.failed_attempts(address("r5")), 1);
        assert!(loader.resident(address("r5")).is_none());
        assert_eq!(log.lock().unwrap().created, [OctantAddress::ROOT]);
        loader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_are_forgotten_once_a_node_leaves_the_view() {
        let config = StreamingConfig {
            max_load_attempts: 1,
            ..Default::default()
        };
        let (mut loader, _log) = loader(config, &["r3"]);
        let visible = selection(&["r", "r3"]);

        for _ in 0..400 {
            loader.update(&visible);
            if loader.failed_attempts(address("r3")) == 1 && loader.loading_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(loader.failed_attempts(address("r3")), 1);
        loader.update(&visible);
        assert!(!loader.is_loading(address("r3")));

        loader.update(&selection(&["r"]));
        assert_eq!(loader.failed_attempts(address("r3")), 0);
        loader.update(&visible);
        assert!(loader.is_loading(address("r3")));
        loader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalidation_rebuilds_visible_meshes() {
        let (mut loader, log) = loader(StreamingConfig::default(), &[]);
        let visible = selection(&["r", "r0"]);
        settle(&mut loader, &visible).await;

        let token = loader.invalidate_token();
        token.invalidate();
        loader.update(&visible);
        assert!(!token.is_set());
        let mut updated = log.lock().unwrap().updated.clone();
        updated.sort();
        assert_eq!(updated, [OctantAddress::ROOT, address("r0")]);
        assert_eq!(log.lock().unwrap().created.len(), 2);

        loader.update(&visible);
        assert_eq!(log.lock().unwrap().updated.len(), 2);
        loader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_releases_every_mesh() {
        let config = StreamingConfig {
            disposal_rate: 0.0,
            ..Default::default()
        };
        let (mut loader, log) = loader(config, &[]);
        settle(&mut loader, &selection(&["r", "r0", "r1"])).await;
        loader.update(&selection(&["r"]));
        assert_eq!(loader.queued_for_disposal(), 2);
        assert!(log.lock().unwrap().disposed.is_empty());

        loader.shutdown().await;
        let mut handles: Vec<u32> = log.lock().unwrap().disposed.iter().map(|(_, h)| *h).collect();
        handles.sort();
        assert_eq!(handles, [1, 2, 3]);
    }
}
