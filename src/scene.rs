// =============================================================================
// SCENE - demo strategy: a row of instanced, rotating cubes
// =============================================================================
//
// Set 0 layout shared by cube.vert:
//   binding 0: camera UBO (view + projection), one per frame
//   binding 1: object UBO array (model matrix), one element per cube
//
// The cube mesh is uploaded once and drawn with one instanced draw call;
// the vertex shader picks its model matrix with gl_InstanceIndex.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Mat4, Quat, Vec3};
use std::path::PathBuf;
use std::time::Duration;
use winit::keyboard::KeyCode;

use crate::backend::{
    AllocatedBuffer, BindingResources, BindingSpec, BufferBinding, DescriptorBinder, DrawCall,
    Mesh, RasterPipeline, RasterPipelineDesc, RenderRegistry, Vertex,
};
use crate::engine::{RenderStrategy, ResourceContext};
use crate::error::EngineResult;
use crate::window::{KeyState, KeyStates};

const CAMERA_BINDING: u32 = 0;
const OBJECT_BINDING: u32 = 1;

const CAMERA_POSITION: Vec3 = Vec3::new(0.0, 0.0, 2.0);
const CAMERA_FOV_DEGREES: f32 = 45.0;
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 100.0;

/// Degrees per second around X and Y.
const ROTATION_SPEED: Vec3 = Vec3::new(100.0, 100.0, 0.0);

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: Mat4,
    pub proj: Mat4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: Mat4,
}

/// Position and orientation of one cube instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeInstance {
    pub position: Vec3,
    /// Euler angles in degrees
    pub rotation: Vec3,
}

impl CubeInstance {
    pub fn advance(&mut self, dt: Duration) {
        self.rotation += ROTATION_SPEED * dt.as_secs_f32();
    }

    pub fn model_matrix(&self) -> Mat4 {
        let rotation = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation.x.to_radians(),
            self.rotation.y.to_radians(),
            self.rotation.z.to_radians(),
        );
        Mat4::from_rotation_translation(rotation, self.position)
    }
}

/// `count` cubes centered on x = 0, five units in front of the camera.
pub fn cube_row(count: u32) -> Vec<CubeInstance> {
    let half = (count / 2) as f32;
    (0..count)
        .map(|i| CubeInstance {
            position: Vec3::new(i as f32 - half, 0.0, -5.0),
            rotation: Vec3::new(-45.0, 45.0, 0.0),
        })
        .collect()
}

/// Camera looking down -Z with a Vulkan (Y-down clip space) projection.
pub fn camera_uniform(aspect: f32) -> CameraUniform {
    let view = Mat4::look_at_rh(CAMERA_POSITION, CAMERA_POSITION + Vec3::NEG_Z, Vec3::Y);
    let mut proj = Mat4::perspective_rh(
        CAMERA_FOV_DEGREES.to_radians(),
        aspect,
        NEAR_PLANE,
        FAR_PLANE,
    );
    proj.y_axis.y *= -1.0;
    CameraUniform { view, proj }
}

/// Unit cube with per-face normals: 24 vertices, 36 indices.
pub fn cube_geometry() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, u, v) with u x v == normal so every face winds CCW from outside
    let faces = [
        (Vec3::X, Vec3::Y, Vec3::Z),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        let center = normal * 0.5;
        // Tint each face by its axis so faces are distinguishable
        let color = (normal.abs() * 0.5 + Vec3::splat(0.3)).to_array();
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            vertices.push(Vertex {
                position: (center + u * su + v * sv).to_array(),
                normal: normal.to_array(),
                color,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// GPU side of the scene, built in `create_resources`.
struct SceneResources {
    registry: RenderRegistry<RasterPipeline, Mesh>,
    binder: DescriptorBinder,
    camera_buffers: Vec<AllocatedBuffer>,
    /// [object][frame]
    object_buffers: Vec<Vec<AllocatedBuffer>>,
}

pub struct CubeScene {
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    objects: Vec<CubeInstance>,
    aspect: f32,
    resources: Option<SceneResources>,
}

impl CubeScene {
    pub fn new(vertex_shader: PathBuf, fragment_shader: PathBuf, object_count: u32) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            objects: cube_row(object_count),
            aspect: 1.0,
            resources: None,
        }
    }

    pub fn objects(&self) -> &[CubeInstance] {
        &self.objects
    }
}

impl RenderStrategy for CubeScene {
    fn create_resources(&mut self, ctx: &ResourceContext<'_>) -> EngineResult<()> {
        self.aspect = ctx.extent.width as f32 / ctx.extent.height.max(1) as f32;
        let frames = ctx.frames_in_flight;
        let object_count = self.objects.len();

        let uniform_buffer = |size: usize, name: &str| {
            ctx.allocator.create_buffer(
                size as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                name,
            )
        };

        let camera_buffers = (0..frames)
            .map(|frame| {
                uniform_buffer(
                    std::mem::size_of::<CameraUniform>(),
                    &format!("camera {frame}"),
                )
            })
            .collect::<EngineResult<Vec<_>>>()?;
        let object_buffers = (0..object_count)
            .map(|object| {
                (0..frames)
                    .map(|frame| {
                        uniform_buffer(
                            std::mem::size_of::<ObjectUniform>(),
                            &format!("object {object} frame {frame}"),
                        )
                    })
                    .collect::<EngineResult<Vec<_>>>()
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let specs = [
            BindingSpec::uniform(CAMERA_BINDING, 1, vk::ShaderStageFlags::VERTEX),
            BindingSpec::uniform(OBJECT_BINDING, object_count as u32, vk::ShaderStageFlags::VERTEX),
        ];
        let binder = DescriptorBinder::new(ctx.device.clone(), &specs, frames)?;

        let as_bindings = |buffers: &[AllocatedBuffer]| -> Vec<BufferBinding> {
            buffers
                .iter()
                .map(|buffer| BufferBinding {
                    buffer: buffer.handle(),
                    range: buffer.size(),
                })
                .collect()
        };
        let resources: [BindingResources; 2] = [
            vec![as_bindings(&camera_buffers)],
            object_buffers.iter().map(|per_frame| as_bindings(per_frame)).collect(),
        ];
        for frame in 0..frames {
            binder.write_frame(frame, &resources)?;
        }

        let pipeline = RasterPipeline::new(
            ctx.device.clone(),
            &RasterPipelineDesc {
                vertex_shader: self.vertex_shader.clone(),
                fragment_shader: self.fragment_shader.clone(),
                color_format: ctx.color_format,
                depth_format: ctx.depth_format,
                set_layout: binder.layout,
                cull_mode: vk::CullModeFlags::BACK,
            },
        )?;

        let (vertices, indices) = cube_geometry();
        let mesh = Mesh::upload(ctx.allocator, ctx.commands, &vertices, &indices, "cube")?;

        let mut registry = RenderRegistry::new();
        let pipeline_id = registry.add_pipeline(pipeline);
        let cube_id = registry.add_drawable(mesh);
        registry.add_instances(pipeline_id, cube_id, object_count as u32)?;

        log::info!("Scene ready: {} cube instance(s)", object_count);

        self.resources = Some(SceneResources {
            registry,
            binder,
            camera_buffers,
            object_buffers,
        });
        Ok(())
    }

    fn update_frame(&mut self, frame: usize, dt: Duration) -> EngineResult<()> {
        let Some(resources) = self.resources.as_mut() else {
            return Ok(());
        };

        resources.camera_buffers[frame].write(&[camera_uniform(self.aspect)])?;

        for (object, buffers) in self.objects.iter_mut().zip(&mut resources.object_buffers) {
            object.advance(dt);
            let uniform = ObjectUniform {
                model: object.model_matrix(),
            };
            buffers[frame].write(&[uniform])?;
        }
        Ok(())
    }

    fn draw_calls(&self) -> Vec<DrawCall> {
        self.resources
            .as_ref()
            .map(|resources| resources.registry.draw_calls())
            .unwrap_or_default()
    }

    fn descriptor_set(&self, frame: usize) -> vk::DescriptorSet {
        self.resources
            .as_ref()
            .map(|resources| resources.binder.set(frame))
            .unwrap_or_default()
    }

    fn process_input(&mut self, keys: &mut KeyStates) {
        if keys.take(KeyCode::Space) == Some(KeyState::Pressed) {
            log::info!("Space pressed: nothing to jump with yet");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recorder::tests::LogSink;
    use crate::backend::FrameTarget;
    use crate::error::EngineError;

    #[test]
    fn cube_has_closed_outward_faces() {
        let (vertices, indices) = cube_geometry();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));

        for triangle in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(vertices[triangle[k] as usize].position));
            let normal = Vec3::from(vertices[triangle[0] as usize].normal);
            let face = (b - a).cross(c - a);
            assert!(face.dot(normal) > 0.0, "triangle {triangle:?} winds inward");
        }
    }

    #[test]
    fn row_is_centered_in_front_of_camera() {
        let row = cube_row(10);
        assert_eq!(row.len(), 10);
        assert_eq!(row[0].position, Vec3::new(-5.0, 0.0, -5.0));
        assert_eq!(row[9].position, Vec3::new(4.0, 0.0, -5.0));
    }

    #[test]
    fn rotation_advances_with_time() {
        let mut cube = cube_row(1)[0];
        let before = cube.model_matrix();
        cube.advance(Duration::from_millis(500));
        assert_eq!(cube.rotation, Vec3::new(5.0, 95.0, 0.0));
        assert_ne!(cube.model_matrix(), before);
        assert_eq!(cube.model_matrix().w_axis.truncate(), cube.position);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = camera_uniform(16.0 / 9.0);
        assert!(camera.proj.y_axis.y < 0.0);
        assert_eq!(std::mem::size_of::<CameraUniform>(), 128);
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 64);
    }

    #[test]
    fn space_press_is_consumed() {
        let mut scene = CubeScene::new("v.spv".into(), "f.spv".into(), 3);
        let mut keys = KeyStates::new();
        keys.record(KeyCode::Space, true, false);
        keys.record(KeyCode::KeyA, true, false);

        scene.process_input(&mut keys);
        assert_eq!(keys.get(KeyCode::Space), None);
        assert_eq!(keys.get(KeyCode::KeyA), Some(KeyState::Pressed));
    }

    #[test]
    fn scene_without_resources_refuses_to_record() {
        let scene = CubeScene::new("v.spv".into(), "f.spv".into(), 3);
        let target = FrameTarget {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            depth: None,
            extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            clear_color: [0.0; 4],
        };
        let mut sink = LogSink::default();

        let result = scene.record_commands(&mut sink, &target, 0);
        assert!(matches!(result, Err(EngineError::NoPipelines)));
        assert!(sink.0.is_empty());
    }
}
