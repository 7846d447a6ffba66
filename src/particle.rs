use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    core::{Canvas, Point, Rgba8, Vec2},
    mask::Mask,
};

/// Spawn batch size at density 1.0.
pub const BASE_COUNT: usize = 150;
/// Rejection-sampling budget per particle slot; exhausted slots are dropped.
const MAX_SAMPLE_ATTEMPTS: u32 = 100;
/// Nominal frame step in milliseconds; `tick` normalizes against this.
const NOMINAL_TICK_MS: f64 = 16.0;
/// A stalled frame catches up by at most this many nominal steps.
const MAX_DELTA_TICKS: f64 = 2.0;
/// Life lost per nominal step.
const LIFE_DECAY: f64 = 0.001;
/// Energy kept on each wall bounce.
const RESTITUTION: f64 = 0.9;
/// Swirl angular rate in radians per nominal step per unit speed.
const SWIRL_RATE: f64 = 0.02;
/// Random-walk noise band per axis per tick.
const NOISE_BAND: f64 = 0.1;
/// Random-walk speed ceiling.
const SPEED_CAP: f64 = 2.0;
/// Flow direction for masks that never got one assigned (straight up).
const DEFAULT_DIRECTION: Vec2 = Vec2::new(0.0, -1.0);

/// Named per-tick motion rule applied uniformly to all particles sharing
/// the tag. Adding a preset means adding a variant here plus its rule below.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Flow,
    Swirl,
    Bounce,
    Random,
}

/// Process-wide simulation configuration, read by every tick.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    /// Spawn density in 0..=1; batch size is `floor(150 * density)`.
    pub density: f64,
    /// Velocity scale in 0..=2.
    pub speed: f64,
    /// Base particle size in pixels, > 0.
    pub size: f64,
    /// Global render opacity in 0..=1.
    pub opacity: f64,
    pub preset: Preset,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            density: 0.5,
            speed: 1.0,
            size: 5.0,
            opacity: 0.8,
            preset: Preset::Flow,
        }
    }
}

/// Shallow-merge patch for [`Settings`]. Absent fields leave the live value
/// untouched; present values are clamped into their documented ranges.
#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub density: Option<f64>,
    pub speed: Option<f64>,
    pub size: Option<f64>,
    pub opacity: Option<f64>,
    pub preset: Option<Preset>,
}

impl Settings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(density) = patch.density {
            self.density = density.clamp(0.0, 1.0);
        }
        if let Some(speed) = patch.speed {
            self.speed = speed.clamp(0.0, 2.0);
        }
        if let Some(size) = patch.size {
            self.size = size.max(0.1);
        }
        if let Some(opacity) = patch.opacity {
            self.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(preset) = patch.preset {
            self.preset = preset;
        }
    }
}

/// A simulated motion entity. Particles are never individually destroyed;
/// a particle whose life runs out is reset in place.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Particle {
    pub position: Point,
    pub velocity: Vec2,
    /// Flow direction captured at spawn; the `flow` rule rescales velocity
    /// from it every tick so the live speed setting keeps applying.
    pub base_direction: Vec2,
    pub size: f64,
    pub rotation: f64,
    /// Radians per nominal step.
    pub rotation_speed: f64,
    /// Decays toward 0, then resets to 1.0 with a fresh random position.
    pub life: f64,
    pub preset: Preset,
    pub color: Rgba8,
}

/// Frame-driven particle simulation. Advances only when `tick` is called by
/// an external render loop; pausing suppresses the tick without draining any
/// state, so resuming continues exactly where motion left off.
pub struct ParticleSystem {
    particles: Vec<Particle>,
    paused: bool,
    rng: StdRng,
}

impl ParticleSystem {
    pub fn new(seed: u64) -> Self {
        Self {
            particles: Vec::new(),
            paused: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Drop every particle (the global clear).
    pub fn clear(&mut self) {
        self.particles.clear();
    }

    /// Seed one batch of particles inside the mask polygon. Each slot gets up
    /// to 100 uniform samples over the full canvas; slots that never land
    /// inside the polygon are dropped, so the batch may come up short.
    /// Returns the number of particles actually spawned.
    #[tracing::instrument(skip_all, fields(density = settings.density))]
    pub fn spawn(&mut self, mask: &Mask, canvas: Canvas, settings: &Settings) -> usize {
        let count = (BASE_COUNT as f64 * settings.density).floor() as usize;
        let direction = mask.direction.unwrap_or(DEFAULT_DIRECTION);
        let mut spawned = 0;
        for _ in 0..count {
            let Some(position) = self.sample_inside(mask, canvas) else {
                continue;
            };
            let size = settings.size * self.rng.random_range(0.5..1.5);
            let rotation = self.rng.random_range(0.0..std::f64::consts::TAU);
            let rotation_speed = self.rng.random_range(-0.05..0.05);
            self.particles.push(Particle {
                position,
                velocity: direction * settings.speed,
                base_direction: direction,
                size,
                rotation,
                rotation_speed,
                life: 1.0,
                preset: settings.preset,
                color: mask.color,
            });
            spawned += 1;
        }
        if spawned < count {
            tracing::debug!(dropped = count - spawned, "spawn sampling exhausted");
        }
        spawned
    }

    fn sample_inside(&mut self, mask: &Mask, canvas: Canvas) -> Option<Point> {
        for _ in 0..MAX_SAMPLE_ATTEMPTS {
            let p = Point::new(
                self.rng.random_range(0.0..f64::from(canvas.width)),
                self.rng.random_range(0.0..f64::from(canvas.height)),
            );
            if mask.contains(p) {
                return Some(p);
            }
        }
        None
    }

    /// Advance the simulation by one frame. `delta_ms` is normalized to
    /// nominal steps and capped at 2 so a stalled frame cannot jump far.
    /// No-op while paused.
    pub fn tick(&mut self, delta_ms: f64, canvas: Canvas, settings: &Settings) {
        if self.paused {
            return;
        }
        let delta = (delta_ms / NOMINAL_TICK_MS).min(MAX_DELTA_TICKS);
        let rng = &mut self.rng;
        for p in &mut self.particles {
            match p.preset {
                Preset::Flow => flow_rule(p, settings),
                Preset::Swirl => swirl_rule(p, canvas, settings, delta),
                Preset::Bounce => bounce_rule(p, canvas),
                Preset::Random => random_rule(p, rng),
            }
            p.position += p.velocity * delta;
            p.rotation += p.rotation_speed * delta;
            wrap_toroidal(p, canvas);
            p.life -= LIFE_DECAY * delta;
            if p.life <= 0.0 {
                respawn_in_place(p, canvas, rng);
            }
        }
    }

    /// Re-tag every live particle so a preset change applies to in-flight
    /// particles immediately, not just to future spawns.
    pub fn retag(&mut self, preset: Preset) {
        for p in &mut self.particles {
            p.preset = preset;
        }
    }
}

/// Direction is fixed; magnitude tracks the live speed setting.
fn flow_rule(p: &mut Particle, settings: &Settings) {
    p.velocity = p.base_direction * settings.speed;
}

/// Pure angular motion about the canvas center: distance from center is
/// invariant, only the angle changes. The rotation is the entire motion, so
/// velocity is zeroed; any leftover linear velocity (a directed spawn, or a
/// particle re-tagged from flow) would walk the particle off its orbit in the
/// shared position advance.
fn swirl_rule(p: &mut Particle, canvas: Canvas, settings: &Settings, delta: f64) {
    let rel = p.position - canvas.center();
    let angle = SWIRL_RATE * settings.speed * delta;
    let (sin, cos) = angle.sin_cos();
    let rotated = Vec2::new(rel.x * cos - rel.y * sin, rel.x * sin + rel.y * cos);
    p.position = canvas.center() + rotated;
    p.velocity = Vec2::ZERO;
}

/// Crossing a canvas edge flips the normal velocity component and bleeds off
/// energy. Applied to velocity only; position keeps its generic update.
fn bounce_rule(p: &mut Particle, canvas: Canvas) {
    if p.position.x < 0.0 || p.position.x > f64::from(canvas.width) {
        p.velocity.x = -p.velocity.x * RESTITUTION;
    }
    if p.position.y < 0.0 || p.position.y > f64::from(canvas.height) {
        p.velocity.y = -p.velocity.y * RESTITUTION;
    }
}

/// Independent uniform noise per axis, then a hard speed ceiling enforced by
/// uniform rescaling.
fn random_rule(p: &mut Particle, rng: &mut StdRng) {
    p.velocity.x += rng.random_range(-NOISE_BAND..NOISE_BAND);
    p.velocity.y += rng.random_range(-NOISE_BAND..NOISE_BAND);
    let speed = p.velocity.hypot();
    if speed > SPEED_CAP {
        p.velocity = p.velocity * (SPEED_CAP / speed);
    }
}

/// Toroidal wrap: a coordinate that exits the canvas by more than the
/// particle's own size teleports to the opposite edge.
fn wrap_toroidal(p: &mut Particle, canvas: Canvas) {
    let (w, h) = (f64::from(canvas.width), f64::from(canvas.height));
    let margin = p.size;
    if p.position.x < -margin {
        p.position.x = w + margin;
    } else if p.position.x > w + margin {
        p.position.x = -margin;
    }
    if p.position.y < -margin {
        p.position.y = h + margin;
    } else if p.position.y > h + margin {
        p.position.y = -margin;
    }
}

/// Perpetual respawn: life back to 1.0, fresh random position over the full
/// canvas and a fresh rotation. Velocity and preset are left untouched.
fn respawn_in_place(p: &mut Particle, canvas: Canvas, rng: &mut StdRng) {
    p.position = Point::new(
        rng.random_range(0.0..f64::from(canvas.width)),
        rng.random_range(0.0..f64::from(canvas.height)),
    );
    p.life = 1.0;
    p.rotation = rng.random_range(0.0..std::f64::consts::TAU);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskAuthoring;

    fn canvas() -> Canvas {
        Canvas::new(200, 200).unwrap()
    }

    fn square_mask(direction: Option<Vec2>) -> Mask {
        let mut auth = MaskAuthoring::new(3);
        auth.start_drawing(0.0, 0.0);
        auth.add_point(100.0, 0.0);
        auth.add_point(100.0, 100.0);
        let mut mask = auth
            .finish_drawing(Some(Point::new(0.0, 100.0)))
            .cloned()
            .unwrap();
        mask.direction = direction;
        mask
    }

    #[test]
    fn spawn_count_scales_with_density_and_stays_inside() {
        let mask = square_mask(Some(Vec2::new(1.0, 0.0)));
        let mut sys = ParticleSystem::new(42);
        let settings = Settings {
            density: 1.0,
            ..Settings::default()
        };
        let spawned = sys.spawn(&mask, canvas(), &settings);
        // The square covers a quarter of the canvas, so 100 attempts per slot
        // make drops vanishingly unlikely.
        assert_eq!(spawned, BASE_COUNT);
        for p in sys.particles() {
            assert!(mask.contains(p.position));
            assert_eq!(p.velocity, Vec2::new(1.0, 0.0));
            assert_eq!(p.preset, Preset::Flow);
            assert_eq!(p.life, 1.0);
            assert!(p.size > 0.0);
        }
    }

    #[test]
    fn spawn_without_direction_defaults_to_up() {
        let mask = square_mask(None);
        let mut sys = ParticleSystem::new(42);
        sys.spawn(&mask, canvas(), &Settings::default());
        assert!(!sys.particles().is_empty());
        for p in sys.particles() {
            assert_eq!(p.base_direction, Vec2::new(0.0, -1.0));
        }
    }

    #[test]
    fn spawn_drops_slots_for_unreachable_masks() {
        // A sliver far outside the canvas sampling extent cannot be hit.
        let mut mask = square_mask(None);
        mask.points = vec![
            Point::new(1000.0, 1000.0),
            Point::new(1001.0, 1000.0),
            Point::new(1001.0, 1001.0),
        ];
        let mut sys = ParticleSystem::new(42);
        let spawned = sys.spawn(&mask, canvas(), &Settings::default());
        assert_eq!(spawned, 0);
        assert!(sys.particles().is_empty());
    }

    #[test]
    fn delta_is_normalized_and_capped() {
        let mask = square_mask(Some(Vec2::new(1.0, 0.0)));
        let mut sys = ParticleSystem::new(42);
        sys.spawn(&mask, canvas(), &Settings::default());

        // 32ms is exactly two nominal steps.
        let before: Vec<Point> = sys.particles().iter().map(|p| p.position).collect();
        sys.tick(32.0, canvas(), &Settings::default());
        for (p, old) in sys.particles().iter().zip(&before) {
            assert!((p.position.x - (old.x + 2.0)).abs() < 1e-9);
            assert!((p.life - (1.0 - 0.002)).abs() < 1e-12);
        }

        // A long stall is capped to the same two steps.
        let before: Vec<Point> = sys.particles().iter().map(|p| p.position).collect();
        sys.tick(500.0, canvas(), &Settings::default());
        for (p, old) in sys.particles().iter().zip(&before) {
            assert!((p.position.x - (old.x + 2.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn life_never_observed_at_or_below_zero_after_a_tick() {
        let mask = square_mask(Some(Vec2::ZERO));
        let mut sys = ParticleSystem::new(42);
        sys.spawn(&mask, canvas(), &Settings::default());
        // 1000 double-steps burn 2.0 worth of life, forcing two respawns.
        for _ in 0..1000 {
            sys.tick(32.0, canvas(), &Settings::default());
            for p in sys.particles() {
                assert!(p.life > 0.0 && p.life <= 1.0);
            }
        }
        // Conserved count: respawn never drops particles.
        assert_eq!(sys.particles().len(), BASE_COUNT / 2);
    }

    #[test]
    fn paused_tick_is_a_noop_and_resume_continues() {
        let mask = square_mask(Some(Vec2::new(1.0, 0.0)));
        let mut sys = ParticleSystem::new(42);
        sys.spawn(&mask, canvas(), &Settings::default());
        let before: Vec<Point> = sys.particles().iter().map(|p| p.position).collect();

        sys.pause();
        sys.tick(16.0, canvas(), &Settings::default());
        let after: Vec<Point> = sys.particles().iter().map(|p| p.position).collect();
        assert_eq!(before, after);

        sys.resume();
        sys.tick(16.0, canvas(), &Settings::default());
        assert_ne!(
            before,
            sys.particles().iter().map(|p| p.position).collect::<Vec<_>>()
        );
    }

    #[test]
    fn flow_velocity_tracks_live_speed_setting() {
        let mask = square_mask(Some(Vec2::new(1.0, 0.0)));
        let mut sys = ParticleSystem::new(42);
        let mut settings = Settings::default();
        sys.spawn(&mask, canvas(), &settings);

        settings.apply(SettingsPatch {
            speed: Some(2.0),
            ..SettingsPatch::default()
        });
        sys.tick(16.0, canvas(), &settings);
        for p in sys.particles() {
            assert_eq!(p.velocity, Vec2::new(2.0, 0.0));
        }
    }

    #[test]
    fn swirl_preserves_distance_from_canvas_center() {
        // Directed mask: spawns carry a nonzero flow velocity that the swirl
        // rule must neutralize, or the orbit radius drifts.
        let mask = square_mask(Some(Vec2::new(1.0, 0.0)));
        let mut sys = ParticleSystem::new(42);
        let settings = Settings {
            preset: Preset::Swirl,
            ..Settings::default()
        };
        sys.spawn(&mask, canvas(), &settings);
        let center = canvas().center();
        let before: Vec<f64> = sys
            .particles()
            .iter()
            .map(|p| (p.position - center).hypot())
            .collect();
        for _ in 0..10 {
            sys.tick(16.0, canvas(), &settings);
        }
        for (p, r0) in sys.particles().iter().zip(&before) {
            assert!(((p.position - center).hypot() - r0).abs() < 1e-6);
        }
    }

    #[test]
    fn switching_directed_flow_to_swirl_keeps_orbit_radius() {
        let mask = square_mask(Some(Vec2::new(1.0, 0.0)));
        let mut sys = ParticleSystem::new(7);
        let mut settings = Settings::default();
        sys.spawn(&mask, canvas(), &settings);
        sys.tick(16.0, canvas(), &settings);

        settings.preset = Preset::Swirl;
        sys.retag(Preset::Swirl);
        let center = canvas().center();
        let before: Vec<f64> = sys
            .particles()
            .iter()
            .map(|p| (p.position - center).hypot())
            .collect();
        for _ in 0..10 {
            sys.tick(16.0, canvas(), &settings);
        }
        for (p, r0) in sys.particles().iter().zip(&before) {
            assert!(((p.position - center).hypot() - r0).abs() < 1e-6);
        }
    }

    #[test]
    fn bounce_attenuates_normal_velocity_by_restitution() {
        let mask = square_mask(Some(Vec2::ZERO));
        let mut sys = ParticleSystem::new(42);
        let settings = Settings {
            preset: Preset::Bounce,
            ..Settings::default()
        };
        sys.spawn(&mask, canvas(), &settings);

        // Force one particle just past the right edge, moving outward.
        sys.particles[0].position = Point::new(201.0, 50.0);
        sys.particles[0].velocity = Vec2::new(1.0, 0.0);
        sys.tick(16.0, canvas(), &settings);
        let v = sys.particles[0].velocity;
        assert!((v.x - (-0.9)).abs() < 1e-12);
        assert_eq!(v.y, 0.0);
    }

    #[test]
    fn random_walk_respects_speed_ceiling() {
        let mask = square_mask(Some(Vec2::ZERO));
        let mut sys = ParticleSystem::new(42);
        let settings = Settings {
            preset: Preset::Random,
            ..Settings::default()
        };
        sys.spawn(&mask, canvas(), &settings);
        for _ in 0..500 {
            sys.tick(16.0, canvas(), &settings);
            for p in sys.particles() {
                assert!(p.velocity.hypot() <= SPEED_CAP + 1e-9);
            }
        }
    }

    #[test]
    fn wrap_teleports_to_the_opposite_edge() {
        let mask = square_mask(Some(Vec2::ZERO));
        let mut sys = ParticleSystem::new(42);
        let settings = Settings::default();
        sys.spawn(&mask, canvas(), &settings);

        let size = sys.particles[0].size;
        sys.particles[0].position = Point::new(-size - 1.0, 50.0);
        sys.tick(16.0, canvas(), &settings);
        assert!(sys.particles[0].position.x > 200.0);
    }

    #[test]
    fn retag_switches_every_live_particle() {
        let mask = square_mask(Some(Vec2::new(1.0, 0.0)));
        let mut sys = ParticleSystem::new(42);
        sys.spawn(&mask, canvas(), &Settings::default());
        sys.retag(Preset::Random);
        assert!(sys.particles().iter().all(|p| p.preset == Preset::Random));
    }

    #[test]
    fn settings_patch_clamps_into_range() {
        let mut s = Settings::default();
        s.apply(SettingsPatch {
            density: Some(4.0),
            speed: Some(-1.0),
            size: Some(0.0),
            opacity: Some(2.0),
            preset: Some(Preset::Bounce),
        });
        assert_eq!(s.density, 1.0);
        assert_eq!(s.speed, 0.0);
        assert_eq!(s.size, 0.1);
        assert_eq!(s.opacity, 1.0);
        assert_eq!(s.preset, Preset::Bounce);

        // Absent fields leave the live value untouched.
        let mut s = Settings::default();
        s.apply(SettingsPatch::default());
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn settings_patch_json_accepts_partial_objects() {
        let patch: SettingsPatch = serde_json::from_str(r#"{"preset":"random"}"#).unwrap();
        assert_eq!(patch.preset, Some(Preset::Random));
        assert!(patch.density.is_none());
    }
}
