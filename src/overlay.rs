use crate::{
    assets::PreparedImage,
    core::{Canvas, Point},
    direction::Compass,
    mask::{Mask, MaskAuthoring},
    particle::{Particle, ParticleSystem, Settings, SettingsPatch},
};

/// The whole effect as one explicit, caller-owned context: canvas extent,
/// mask authoring, particle simulation, live settings and the loaded images.
/// Everything is single-threaded and frame-driven; the caller pumps pointer
/// input into the authoring methods and calls [`Overlay::tick`] once per
/// animation frame. There are no ambient singletons.
pub struct Overlay {
    canvas: Canvas,
    settings: Settings,
    authoring: MaskAuthoring,
    particles: ParticleSystem,
    background: Option<PreparedImage>,
    material: Option<PreparedImage>,
}

impl Overlay {
    /// All randomness (mask colors, particle seeding and respawns) derives
    /// from `seed`, so two overlays fed the same inputs evolve identically.
    pub fn new(canvas: Canvas, seed: u64) -> Self {
        Self {
            canvas,
            settings: Settings::default(),
            authoring: MaskAuthoring::new(seed),
            particles: ParticleSystem::new(seed ^ 0x9E37_79B9_7F4A_7C15),
            background: None,
            material: None,
        }
    }

    pub fn canvas(&self) -> Canvas {
        self.canvas
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn masks(&self) -> &[Mask] {
        self.authoring.masks()
    }

    pub fn in_progress_mask(&self) -> Option<&Mask> {
        self.authoring.in_progress()
    }

    pub fn particles(&self) -> &[Particle] {
        self.particles.particles()
    }

    /// Background image the particles are drawn over.
    pub fn set_background(&mut self, image: PreparedImage) {
        self.background = Some(image);
    }

    pub fn background(&self) -> Option<&PreparedImage> {
        self.background.as_ref()
    }

    /// Optional particle texture; without one particles render as circles.
    pub fn set_material(&mut self, image: Option<PreparedImage>) {
        self.material = image;
    }

    pub fn material(&self) -> Option<&PreparedImage> {
        self.material.as_ref()
    }

    pub fn start_drawing(&mut self, x: f64, y: f64) {
        self.authoring.start_drawing(x, y);
    }

    pub fn add_point(&mut self, x: f64, y: f64) {
        self.authoring.add_point(x, y);
    }

    /// Close the in-progress mask. Returns the committed mask (for the caller
    /// to place a direction selector at its center), or `None` if the mask is
    /// not closeable yet. Particles are seeded when a direction is applied,
    /// not here.
    pub fn finish_drawing(&mut self, final_point: Option<Point>) -> Option<Mask> {
        self.authoring.finish_drawing(final_point).cloned()
    }

    pub fn cancel_drawing(&mut self) {
        self.authoring.cancel_drawing();
    }

    /// Assign a compass direction to a committed mask and seed its particle
    /// batch. Each mask owns exactly one batch: re-selecting a direction for
    /// an already-directed mask replaces its particles rather than stacking a
    /// second batch. An out-of-range index is a no-op.
    pub fn apply_direction(&mut self, index: usize, compass: Compass) {
        let had_direction = self
            .authoring
            .masks()
            .get(index)
            .is_some_and(|m| m.direction.is_some());
        self.authoring.update_direction(index, compass.velocity());
        let Some(mask) = self.authoring.masks().get(index).cloned() else {
            return;
        };
        if had_direction {
            self.respawn_all();
        } else {
            self.particles.spawn(&mask, self.canvas, &self.settings);
        }
    }

    /// Drop all particles and re-seed one batch per directed mask. Used after
    /// settings changes that only affect freshly spawned particles (density,
    /// size).
    pub fn respawn_all(&mut self) {
        self.particles.clear();
        let masks: Vec<Mask> = self
            .authoring
            .masks()
            .iter()
            .filter(|m| m.direction.is_some())
            .cloned()
            .collect();
        for mask in &masks {
            self.particles.spawn(mask, self.canvas, &self.settings);
        }
    }

    /// Shallow-merge `patch` into the live settings and immediately re-tag
    /// every live particle's preset, so a preset change applies to in-flight
    /// particles before the next tick.
    pub fn update_settings(&mut self, patch: SettingsPatch) {
        self.settings.apply(patch);
        self.particles.retag(self.settings.preset);
    }

    /// Advance the simulation by one frame. No-op while paused.
    pub fn tick(&mut self, delta_ms: f64) {
        self.particles
            .tick(delta_ms, self.canvas, &self.settings);
    }

    pub fn pause(&mut self) {
        self.particles.pause();
    }

    pub fn resume(&mut self) {
        self.particles.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.particles.is_paused()
    }

    /// Clear everything: masks, the in-progress draw and all particles.
    pub fn clear(&mut self) {
        self.authoring.clear_all();
        self.particles.clear();
    }
}
