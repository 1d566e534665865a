//! Background and foreground channels and the rules for switching them:
//! immediately, or queued until the next cue boundary.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    assets::{ActiveAsset, AssetCatalog, AssetDescriptor, Frame, Layer, MediaBackend, Resolution},
    Result, VisualHiveError,
};

/// What a switch request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The requested asset was already active.
    Unchanged,
    Switched,
    /// Stored until the next cue boundary.
    Queued,
}

/// One swappable layer. Once a background channel is initialised it always
/// holds exactly one open asset; the foreground may be empty.
#[derive(Debug)]
pub struct AssetChannel {
    layer: Layer,
    active: Option<ActiveAsset>,
    queued: Option<Arc<AssetDescriptor>>,
}

impl AssetChannel {
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            active: None,
            queued: None,
        }
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// Returns the asset currently on screen, if any.
    pub fn active(&self) -> Option<&ActiveAsset> {
        self.active.as_ref()
    }

    pub fn active_descriptor(&self) -> Option<&Arc<AssetDescriptor>> {
        self.active.as_ref().map(ActiveAsset::descriptor)
    }

    /// Asset waiting for the next cue boundary.
    pub fn queued(&self) -> Option<&Arc<AssetDescriptor>> {
        self.queued.as_ref()
    }

    /// True when `descriptor` is the asset on screen.
    pub fn is_active(&self, descriptor: &AssetDescriptor) -> bool {
        self.active_descriptor()
            .is_some_and(|active| active.name == descriptor.name)
    }

    /// Opens `descriptor` and makes it active. The new asset is opened before
    /// the old one is closed, so a failed open leaves the channel untouched.
    pub fn set_active(
        &mut self,
        descriptor: Arc<AssetDescriptor>,
        backend: &dyn MediaBackend,
        resolution: Resolution,
    ) -> Result<SwitchOutcome> {
        if self.is_active(&descriptor) {
            return Ok(SwitchOutcome::Unchanged);
        }

        let next = ActiveAsset::open(descriptor, backend, resolution)?;
        tracing::info!(layer = ?self.layer, asset = %next.name(), "switched asset");
        if let Some(previous) = self.active.replace(next) {
            previous.close();
        }
        Ok(SwitchOutcome::Switched)
    }

    pub fn queue(&mut self, descriptor: Arc<AssetDescriptor>) -> SwitchOutcome {
        if self.is_active(&descriptor) {
            return SwitchOutcome::Unchanged;
        }
        tracing::info!(layer = ?self.layer, asset = %descriptor.name, "queued asset for next cue");
        self.queued = Some(descriptor);
        SwitchOutcome::Queued
    }

    /// Removes and returns the queued asset.
    pub fn take_queued(&mut self) -> Option<Arc<AssetDescriptor>> {
        self.queued.take()
    }

    pub fn clear_queue(&mut self) {
        self.queued = None;
    }

    /// Next frame of the active asset; `None` when nothing is active.
    pub fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.active.as_mut().map(ActiveAsset::next_frame)
    }

    pub fn fps(&self) -> Option<f64> {
        self.active.as_ref().and_then(ActiveAsset::fps)
    }
}

/// Snapshot of the channel selection, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct TransitionStatus {
    pub background: Option<Arc<AssetDescriptor>>,
    pub foreground: Option<Arc<AssetDescriptor>>,
    pub queued_background: Option<Arc<AssetDescriptor>>,
    pub queued_foreground: Option<Arc<AssetDescriptor>>,
    pub cue_mode: bool,
}

/// Shared handle to the published [`TransitionStatus`].
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    shared: Arc<Mutex<TransitionStatus>>,
}

impl StatusHandle {
    /// Copies the latest published status.
    pub fn snapshot(&self) -> Result<TransitionStatus> {
        Ok(self.lock()?.clone())
    }

    fn store(&self, status: TransitionStatus) -> Result<()> {
        *self.lock()? = status;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, TransitionStatus>> {
        self.shared
            .lock()
            .map_err(|_| VisualHiveError::Poisoned("transition status"))
    }
}

/// Per-channel result of a cue commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitSource {
    Queued,
    Random,
    /// Nothing to switch to, or the open failed.
    Kept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    pub background: CommitSource,
    pub foreground: CommitSource,
}

pub struct TransitionManager {
    catalog: AssetCatalog,
    backend: Arc<dyn MediaBackend>,
    resolution: Resolution,
    background: AssetChannel,
    foreground: AssetChannel,
    cue_mode: bool,
    status: StatusHandle,
}

impl TransitionManager {
    /// Opens the default background and foreground. A background that cannot
    /// be opened is fatal; a missing foreground only disables the overlay.
    pub fn new(catalog: AssetCatalog, backend: Arc<dyn MediaBackend>, resolution: Resolution) -> Result<Self> {
        let mut manager = Self {
            catalog,
            backend,
            resolution,
            background: AssetChannel::new(Layer::Background),
            foreground: AssetChannel::new(Layer::Foreground),
            cue_mode: false,
            status: StatusHandle::default(),
        };

        let background = manager
            .catalog
            .default_background()
            .ok_or(VisualHiveError::NoDefaultBackground)?;
        manager
            .background
            .set_active(background, manager.backend.as_ref(), resolution)
            .map_err(|err| {
                tracing::error!(%err, "default background failed to open");
                VisualHiveError::NoDefaultBackground
            })?;

        match manager.catalog.default_foreground() {
            Some(foreground) => {
                if let Err(err) =
                    manager
                        .foreground
                        .set_active(foreground, manager.backend.as_ref(), resolution)
                {
                    tracing::warn!(%err, "running without a foreground overlay");
                }
            }
            None => tracing::warn!("no foreground assets, running background only"),
        }

        manager.publish();
        Ok(manager)
    }

    pub fn background(&self) -> &AssetChannel {
        &self.background
    }

    pub fn foreground(&self) -> &AssetChannel {
        &self.foreground
    }

    pub fn background_mut(&mut self) -> &mut AssetChannel {
        &mut self.background
    }

    pub fn foreground_mut(&mut self) -> &mut AssetChannel {
        &mut self.foreground
    }

    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }

    /// Whether switches wait for a cue boundary.
    pub fn cue_mode(&self) -> bool {
        self.cue_mode
    }

    /// Handle other threads can read the transition status through.
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Turning cue mode off drops anything still queued.
    pub fn set_cue_mode(&mut self, enabled: bool) {
        if self.cue_mode == enabled {
            return;
        }
        self.cue_mode = enabled;
        if !enabled {
            self.background.clear_queue();
            self.foreground.clear_queue();
        }
        tracing::info!(enabled, "cue mode");
        self.publish();
    }

    /// Flips cue mode and returns the new setting. Leaving cue mode drops queued switches.
    pub fn toggle_cue_mode(&mut self) -> bool {
        self.set_cue_mode(!self.cue_mode);
        self.cue_mode
    }

    /// Resolves `key` through the catalog. `Ok(None)` when nothing is bound.
    pub fn select_key(&mut self, key: char) -> Result<Option<SwitchOutcome>> {
        match self.catalog.asset_by_key(key) {
            Some(descriptor) => self.select(descriptor).map(Some),
            None => Ok(None),
        }
    }

    /// Applies `descriptor` now, or queues it while cue mode is on.
    pub fn select(&mut self, descriptor: Arc<AssetDescriptor>) -> Result<SwitchOutcome> {
        let cue_mode = self.cue_mode;
        let backend = Arc::clone(&self.backend);
        let resolution = self.resolution;
        let channel = self.channel_mut(descriptor.layer);

        let outcome = if cue_mode {
            channel.queue(descriptor)
        } else {
            channel.set_active(descriptor, backend.as_ref(), resolution)?
        };
        if outcome != SwitchOutcome::Unchanged {
            self.publish();
        }
        Ok(outcome)
    }

    /// Promotes queued assets at a cue boundary. Channels with nothing queued
    /// get a random pick so every boundary changes the picture.
    pub fn commit_cue(&mut self) -> CommitReport {
        let report = CommitReport {
            background: self.commit_channel(Layer::Background),
            foreground: self.commit_channel(Layer::Foreground),
        };
        tracing::info!(?report, "cue committed");
        self.publish();
        report
    }

    fn commit_channel(&mut self, layer: Layer) -> CommitSource {
        let backend = Arc::clone(&self.backend);
        let resolution = self.resolution;

        let (next, source) = match self.channel_mut(layer).take_queued() {
            Some(queued) => (Some(queued), CommitSource::Queued),
            None => {
                let current = self.channel(layer).active_descriptor().cloned();
                let pick = self.catalog.random_pick(layer, current.as_deref());
                (pick, CommitSource::Random)
            }
        };
        let Some(next) = next else {
            return CommitSource::Kept;
        };

        match self.channel_mut(layer).set_active(next, backend.as_ref(), resolution) {
            Ok(SwitchOutcome::Unchanged) => CommitSource::Kept,
            Ok(_) => source,
            Err(err) => {
                tracing::warn!(%err, ?layer, "cue switch failed, keeping current asset");
                CommitSource::Kept
            }
        }
    }

    fn channel(&self, layer: Layer) -> &AssetChannel {
        match layer {
            Layer::Background => &self.background,
            Layer::Foreground => &self.foreground,
        }
    }

    fn channel_mut(&mut self, layer: Layer) -> &mut AssetChannel {
        match layer {
            Layer::Background => &mut self.background,
            Layer::Foreground => &mut self.foreground,
        }
    }

    fn publish(&self) {
        let status = TransitionStatus {
            background: self.background.active_descriptor().cloned(),
            foreground: self.foreground.active_descriptor().cloned(),
            queued_background: self.background.queued().cloned(),
            queued_foreground: self.foreground.queued().cloned(),
            cue_mode: self.cue_mode,
        };
        if let Err(err) = self.status.store(status) {
            tracing::warn!(%err, "could not publish transition status");
        }
    }
}

impl std::fmt::Debug for TransitionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionManager")
            .field("background", &self.background)
            .field("foreground", &self.foreground)
            .field("cue_mode", &self.cue_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{background, foreground, CountingBackend};

    fn manager_with(backend: CountingBackend) -> (TransitionManager, CountingBackend) {
        let catalog = AssetCatalog::with_seed(
            vec![
                background("tunnel", '1'),
                background("waves", '2'),
                background("grid", '3'),
                foreground("logo", 'a'),
                foreground("mask", 'b'),
            ],
            42,
        )
        .unwrap();
        let manager =
            TransitionManager::new(catalog, Arc::new(backend.clone()), Resolution::new(8, 8)).unwrap();
        (manager, backend)
    }

    fn active_name(channel: &AssetChannel) -> &str {
        channel.active().map(ActiveAsset::name).unwrap_or("")
    }

    #[test]
    fn opens_defaults_on_start() {
        let (manager, backend) = manager_with(CountingBackend::default());
        assert_eq!(active_name(manager.background()), "tunnel");
        assert_eq!(active_name(manager.foreground()), "logo");
        assert_eq!(backend.opens(), 2);

        let status = manager.status().snapshot().unwrap();
        assert_eq!(status.background.unwrap().name, "tunnel");
        assert!(!status.cue_mode);
    }

    #[test]
    fn instant_switch_closes_previous_asset() {
        let (mut manager, backend) = manager_with(CountingBackend::default());
        assert_eq!(manager.select_key('2').unwrap(), Some(SwitchOutcome::Switched));
        assert_eq!(active_name(manager.background()), "waves");
        assert_eq!(backend.closes(), 1);
        assert_eq!(manager.select_key('z').unwrap(), None);
    }

    #[test]
    fn selecting_active_asset_is_a_no_op() {
        let (mut manager, backend) = manager_with(CountingBackend::default());
        let before = manager.background().active_descriptor().cloned().unwrap();

        assert_eq!(manager.select_key('1').unwrap(), Some(SwitchOutcome::Unchanged));
        assert!(Arc::ptr_eq(&before, manager.background().active_descriptor().unwrap()));
        assert_eq!(backend.opens(), 2);
        assert_eq!(backend.closes(), 0);

        manager.set_cue_mode(true);
        assert_eq!(manager.select_key('1').unwrap(), Some(SwitchOutcome::Unchanged));
        assert!(manager.background().queued().is_none());
    }

    #[test]
    fn cue_mode_defers_until_commit() {
        let (mut manager, _) = manager_with(CountingBackend::default());
        manager.toggle_cue_mode();

        assert_eq!(manager.select_key('3').unwrap(), Some(SwitchOutcome::Queued));
        assert_eq!(active_name(manager.background()), "tunnel");
        assert_eq!(manager.background().queued().unwrap().name, "grid");
        assert_eq!(
            manager.status().snapshot().unwrap().queued_background.unwrap().name,
            "grid"
        );

        let report = manager.commit_cue();
        assert_eq!(report.background, CommitSource::Queued);
        assert_eq!(active_name(manager.background()), "grid");
        assert!(manager.background().queued().is_none());

        // The foreground had nothing queued and was shuffled instead.
        assert_eq!(report.foreground, CommitSource::Random);
        assert_eq!(active_name(manager.foreground()), "mask");
    }

    #[test]
    fn disabling_cue_mode_drops_queue() {
        let (mut manager, _) = manager_with(CountingBackend::default());
        manager.set_cue_mode(true);
        manager.select_key('2').unwrap();
        manager.select_key('b').unwrap();
        manager.set_cue_mode(false);

        assert!(manager.background().queued().is_none());
        assert!(manager.foreground().queued().is_none());
        assert_eq!(active_name(manager.background()), "tunnel");
    }

    #[test]
    fn failed_switch_keeps_previous_asset() {
        let (mut manager, backend) = manager_with(CountingBackend::failing_on(&["waves"]));
        let err = manager.select_key('2').unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(active_name(manager.background()), "tunnel");
        assert_eq!(backend.closes(), 0);

        manager.set_cue_mode(true);
        manager.select_key('2').unwrap();
        assert_eq!(manager.commit_cue().background, CommitSource::Kept);
        assert_eq!(active_name(manager.background()), "tunnel");
    }

    #[test]
    fn background_failure_at_start_is_fatal() {
        let catalog = AssetCatalog::new(vec![background("tunnel", '1')]).unwrap();
        let err = TransitionManager::new(
            catalog,
            Arc::new(CountingBackend::failing()),
            Resolution::new(8, 8),
        )
        .unwrap_err();
        assert!(err.is_fatal());

        let empty = AssetCatalog::new(vec![foreground("logo", 'a')]).unwrap();
        let err = TransitionManager::new(empty, Arc::new(CountingBackend::default()), Resolution::new(8, 8))
            .unwrap_err();
        assert!(matches!(err, VisualHiveError::NoDefaultBackground));
    }

    #[test]
    fn missing_foreground_degrades_to_background_only() {
        let catalog =
            AssetCatalog::new(vec![background("tunnel", '1'), foreground("logo", 'a')]).unwrap();
        let manager = TransitionManager::new(
            catalog,
            Arc::new(CountingBackend::failing_on(&["logo"])),
            Resolution::new(8, 8),
        )
        .unwrap();

        assert_eq!(active_name(manager.background()), "tunnel");
        assert!(manager.foreground().active().is_none());
    }
}
