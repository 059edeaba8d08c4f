//! Batching demo application
//!
//! Builds a random scene of boxes, lines and glass panes, then runs a number
//! of frames against a recording backend while animating materials, moving
//! transforms and streaming inserts and removals from a producer thread.
//! Usage: `batch_demo [config.toml|config.ron] [frames]`

use molecule_engine::foundation::logging;
use molecule_engine::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;

/// Demo application errors
#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Batching error: {0}")]
    Batch(#[from] BatchError),

    #[error("Producer thread panicked")]
    Producer,
}

/// An appearance whose material the demo animates
struct AnimatedMaterial {
    appearance: AppearanceHandle,
    material: AttributeHandle,
    phase: f32,
}

struct BatchDemo {
    scene: SceneState,
    container: MoleculeContainer,
    renderer: BatchRenderer,
    backend: RecordingBackend,
    rng: StdRng,
    appearances: Vec<AppearanceHandle>,
    animated: Vec<AnimatedMaterial>,
    transforms: Vec<TransformHandle>,
    atoms: Vec<AtomHandle>,
    view: ViewState,
}

impl BatchDemo {
    fn new(config: &ApplicationConfig) -> Self {
        Self {
            scene: SceneState::new(),
            container: MoleculeContainer::new(&config.batching),
            renderer: BatchRenderer::new(),
            backend: RecordingBackend::new(),
            rng: StdRng::seed_from_u64(7),
            appearances: Vec::new(),
            animated: Vec::new(),
            transforms: Vec::new(),
            atoms: Vec::new(),
            view: ViewState {
                eye: Point3::new(0.0, 5.0, 40.0),
                locale: LocaleId::default(),
            },
        }
    }

    fn initialize(&mut self) -> Result<(), DemoError> {
        log::info!("Building demo scene...");
        let store = &mut self.scene.attributes;

        // A small palette of stable materials shared by most shapes
        for i in 0..6 {
            let shade = i as f32 / 6.0;
            let material = store.create_attribute(MaterialAttrs::new().with_diffuse(shade, 0.4, 1.0 - shade), false);
            let appearance = store.create_appearance();
            store.set_component(appearance, AttributeKind::Material, Some(material))?;
            self.appearances.push(appearance);
        }

        // Wireframe look
        let material = store.create_attribute(MaterialAttrs::new().with_diffuse(0.9, 0.9, 0.9), false);
        let polygon = store.create_attribute(PolygonAttrs::new(PolygonMode::Line), false);
        let wireframe = store.create_appearance();
        store.set_component(wireframe, AttributeKind::Material, Some(material))?;
        store.set_component(wireframe, AttributeKind::Polygon, Some(polygon))?;
        self.appearances.push(wireframe);

        // Glass
        let transparency = store.create_attribute(TransparencyAttrs::new(TransparencyMode::Blended, 0.6), false);
        let glass = store.create_appearance();
        store.set_component(glass, AttributeKind::Transparency, Some(transparency))?;
        self.appearances.push(glass);

        // Pulsing materials, bound by reference
        for i in 0..3 {
            let material = store.create_attribute(MaterialAttrs::new().with_emissive(1.0, 0.2, 0.2), true);
            let appearance = store.create_appearance();
            store.set_component(appearance, AttributeKind::Material, Some(material))?;
            self.animated.push(AnimatedMaterial { appearance, material, phase: i as f32 });
        }

        for _ in 0..24 {
            let offset = Vec3::new(
                self.rng.gen_range(-20.0..20.0),
                self.rng.gen_range(-5.0..5.0),
                self.rng.gen_range(-30.0..0.0),
            );
            self.transforms.push(self.scene.transforms.create(Mat4::new_translation(&offset)));
        }

        for _ in 0..200 {
            let atom = self.spawn_random_atom()?;
            self.container.resolve_and_insert(atom, &self.scene)?;
            self.atoms.push(atom);
        }
        for animated in &self.animated {
            let key = AtomKey::new(self.transforms[0], LocaleId::default());
            let geometry = GeometryDesc::surface(36, unit_box());
            let atom = self.container.spawn_atom(RenderAtomDesc::new(geometry, Some(animated.appearance), key))?;
            self.container.resolve_and_insert(atom, &self.scene)?;
        }

        let report = self.container.commit(&mut self.scene);
        log::info!(
            "Scene ready: {} atoms in {} render molecules",
            report.atoms_added,
            self.container.molecule_count()
        );
        Ok(())
    }

    fn spawn_random_atom(&mut self) -> Result<AtomHandle, DemoError> {
        let transform = self.transforms[self.rng.gen_range(0..self.transforms.len())];
        let appearance = self.appearances[self.rng.gen_range(0..self.appearances.len())];
        let geometry = if self.rng.gen_bool(0.2) {
            GeometryDesc::new(GeometryType::LINE, VertexFormat::COORDINATES, 2, unit_box())
        } else {
            GeometryDesc::surface(36, unit_box())
        };
        let mut flags = AtomFlags::empty();
        if self.rng.gen_bool(0.05) {
            flags |= AtomFlags::BILLBOARD;
        }
        let key = AtomKey::new(transform, LocaleId::default());
        let desc = RenderAtomDesc::new(geometry, Some(appearance), key).with_flags(flags);
        Ok(self.container.spawn_atom(desc)?)
    }

    /// Animate materials and transforms, and stream edits from a producer
    fn update(&mut self, frame: u32) -> Result<(), DemoError> {
        let t = frame as f32 * 0.1;
        for animated in &self.animated {
            let pulse = 0.5 + 0.5 * (t + animated.phase).sin();
            let material = MaterialAttrs::new().with_emissive(pulse, 0.2, 0.2);
            self.scene.attributes.set_attribute(animated.material, material)?;
            self.container.attribute_changed(animated.appearance, DirtyAttrs::MATERIAL);
        }

        let moved = self.transforms[frame as usize % self.transforms.len()];
        let offset = Vec3::new(t.sin() * 10.0, 0.0, -15.0 + t.cos() * 10.0);
        self.scene.transforms.set(moved, Mat4::new_translation(&offset))?;

        // Churn a few atoms through the cross-thread edit queue
        let mut fresh = Vec::with_capacity(4);
        for _ in 0..4 {
            fresh.push(self.spawn_random_atom()?);
        }
        let mut stale = Vec::with_capacity(4);
        for _ in 0..4 {
            if self.atoms.is_empty() {
                break;
            }
            let index = self.rng.gen_range(0..self.atoms.len());
            stale.push(self.atoms.swap_remove(index));
        }
        self.atoms.extend(&fresh);

        let sender = self.container.edit_sender();
        let producer = thread::spawn(move || -> Result<(), BatchError> {
            for atom in fresh {
                sender.insert(atom)?;
            }
            for atom in stale {
                sender.release(atom)?;
            }
            Ok(())
        });
        producer.join().map_err(|_| DemoError::Producer)??;
        Ok(())
    }

    fn run(&mut self, frames: u32) -> Result<(), DemoError> {
        log::info!("Running {} frames...", frames);
        let mut total_draws = 0;
        let mut total_loads = 0;

        for frame in 0..frames {
            self.update(frame)?;
            let report = self.container.commit(&mut self.scene);
            if report.splices > 0 || report.molecules_destroyed > 0 {
                log::debug!("Frame {}: {:?}", frame, report);
            }

            self.backend.clear();
            let stats = self.renderer.render_frame(
                &mut self.container,
                &self.scene,
                ContextId(0),
                &self.view,
                &mut self.backend,
            )?;
            total_draws += stats.draw_calls();
            total_loads += stats.attribute_loads;
        }

        let stats = self.container.stats();
        log::info!(
            "Done: {} molecules live, {} created, {} destroyed, {} splices, {} display-list failures",
            self.container.molecule_count(),
            stats.molecules_created,
            stats.molecules_destroyed,
            stats.splices,
            stats.display_list_failures
        );
        log::info!(
            "Averages per frame: {:.1} draw calls, {:.1} attribute loads",
            total_draws as f32 / frames.max(1) as f32,
            total_loads as f32 / frames.max(1) as f32
        );
        Ok(())
    }
}

fn unit_box() -> Aabb {
    Aabb::from_center_extents(Vec3::zeros(), Vec3::new(0.5, 0.5, 0.5))
}

fn load_config(path: Option<&str>) -> Result<ApplicationConfig, DemoError> {
    let config = match path {
        Some(path) => ApplicationConfig::load_from_file(path)?,
        None => ApplicationConfig::default(),
    };
    config.validate().map_err(DemoError::Invalid)?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1).map(String::as_str))?;
    logging::init_with_level(&config.engine.log_level);

    log::info!("Starting batching demo");
    let frames = args.get(2).and_then(|arg| arg.parse().ok()).unwrap_or(120);

    let mut demo = BatchDemo::new(&config);
    demo.initialize()?;
    if let Err(e) = demo.run(frames) {
        log::error!("Demo failed: {}", e);
        return Err(e.into());
    }
    log::info!("Batching demo finished successfully");
    Ok(())
}
