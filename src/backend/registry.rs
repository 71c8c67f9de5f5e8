// Pipelines, drawables and the batches that pair them
//
// Both live in plain vectors and are referred to by index, so growing either
// vector never invalidates a batch.

use ash::vk;
use std::collections::BTreeMap;

use super::recorder::DrawCall;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipelineId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DrawableId(pub usize);

/// What a draw needs from a pipeline.
pub trait PipelineHandles {
    fn pipeline(&self) -> vk::Pipeline;
    fn layout(&self) -> vk::PipelineLayout;
    fn cull_mode(&self) -> vk::CullModeFlags;
}

/// What a draw needs from a drawable.
pub trait DrawableBuffers {
    fn vertex_buffer(&self) -> vk::Buffer;
    fn index_buffer(&self) -> vk::Buffer;
    fn index_count(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub drawable: DrawableId,
    pub instance_count: u32,
}

pub struct RenderRegistry<P, D> {
    pipelines: Vec<P>,
    drawables: Vec<D>,
    batches: BTreeMap<PipelineId, Batch>,
}

impl<P, D> Default for RenderRegistry<P, D> {
    fn default() -> Self {
        Self {
            pipelines: Vec::new(),
            drawables: Vec::new(),
            batches: BTreeMap::new(),
        }
    }
}

impl<P, D> RenderRegistry<P, D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pipeline(&mut self, pipeline: P) -> PipelineId {
        self.pipelines.push(pipeline);
        PipelineId(self.pipelines.len() - 1)
    }

    pub fn add_drawable(&mut self, drawable: D) -> DrawableId {
        self.drawables.push(drawable);
        DrawableId(self.drawables.len() - 1)
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&P> {
        self.pipelines.get(id.0)
    }

    pub fn drawable(&self, id: DrawableId) -> Option<&D> {
        self.drawables.get(id.0)
    }

    pub fn pipelines(&self) -> &[P] {
        &self.pipelines
    }

    /// Draw `drawable` with `pipeline`, `instances` times per frame.
    ///
    /// A pipeline has one batch; adding more instances of the same drawable
    /// grows it, a different drawable is rejected.
    pub fn add_instances(
        &mut self,
        pipeline: PipelineId,
        drawable: DrawableId,
        instances: u32,
    ) -> EngineResult<()> {
        if pipeline.0 >= self.pipelines.len() {
            return Err(EngineError::Registry(format!("unknown {pipeline:?}")));
        }
        if drawable.0 >= self.drawables.len() {
            return Err(EngineError::Registry(format!("unknown {drawable:?}")));
        }

        let batch = self.batches.entry(pipeline).or_insert(Batch {
            drawable,
            instance_count: 0,
        });
        if batch.drawable != drawable {
            return Err(EngineError::Registry(format!(
                "{pipeline:?} already draws {:?}",
                batch.drawable
            )));
        }
        batch.instance_count += instances;
        Ok(())
    }

    pub fn batches(&self) -> impl Iterator<Item = (PipelineId, &Batch)> {
        self.batches.iter().map(|(id, batch)| (*id, batch))
    }

    /// Total instances across every batch.
    pub fn instance_count(&self) -> u32 {
        self.batches.values().map(|batch| batch.instance_count).sum()
    }
}

impl<P: PipelineHandles, D: DrawableBuffers> RenderRegistry<P, D> {
    /// One draw per batch, in pipeline id order.
    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.batches
            .iter()
            .filter(|(_, batch)| batch.instance_count > 0)
            .map(|(pipeline_id, batch)| {
                let pipeline = &self.pipelines[pipeline_id.0];
                let drawable = &self.drawables[batch.drawable.0];
                DrawCall {
                    pipeline: pipeline.pipeline(),
                    layout: pipeline.layout(),
                    cull_mode: pipeline.cull_mode(),
                    vertex_buffer: drawable.vertex_buffer(),
                    index_buffer: drawable.index_buffer(),
                    index_count: drawable.index_count(),
                    instance_count: batch.instance_count,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    struct FakePipeline(u64);

    impl PipelineHandles for FakePipeline {
        fn pipeline(&self) -> vk::Pipeline {
            vk::Pipeline::from_raw(self.0)
        }
        fn layout(&self) -> vk::PipelineLayout {
            vk::PipelineLayout::from_raw(self.0 + 100)
        }
        fn cull_mode(&self) -> vk::CullModeFlags {
            vk::CullModeFlags::BACK
        }
    }

    struct FakeMesh(u64, u32);

    impl DrawableBuffers for FakeMesh {
        fn vertex_buffer(&self) -> vk::Buffer {
            vk::Buffer::from_raw(self.0)
        }
        fn index_buffer(&self) -> vk::Buffer {
            vk::Buffer::from_raw(self.0 + 1)
        }
        fn index_count(&self) -> u32 {
            self.1
        }
    }

    #[test]
    fn ids_stay_valid_as_vectors_grow() {
        let mut registry = RenderRegistry::new();
        let first = registry.add_pipeline(FakePipeline(1));
        let mesh = registry.add_drawable(FakeMesh(10, 36));
        registry.add_instances(first, mesh, 2).unwrap();

        for raw in 2..64 {
            registry.add_pipeline(FakePipeline(raw));
        }

        let calls = registry.draw_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pipeline.as_raw(), 1);
        assert_eq!(calls[0].index_count, 36);
        assert_eq!(calls[0].instance_count, 2);
    }

    #[test]
    fn instances_accumulate_per_pipeline() {
        let mut registry = RenderRegistry::new();
        let a = registry.add_pipeline(FakePipeline(1));
        let b = registry.add_pipeline(FakePipeline(2));
        let cube = registry.add_drawable(FakeMesh(10, 36));
        let quad = registry.add_drawable(FakeMesh(20, 6));

        registry.add_instances(b, quad, 1).unwrap();
        registry.add_instances(a, cube, 3).unwrap();
        registry.add_instances(a, cube, 2).unwrap();

        let calls = registry.draw_calls();
        let summary: Vec<(u64, u64, u32)> = calls
            .iter()
            .map(|c| (c.pipeline.as_raw(), c.vertex_buffer.as_raw(), c.instance_count))
            .collect();
        assert_eq!(summary, vec![(1, 10, 5), (2, 20, 1)]);
        assert_eq!(registry.instance_count(), 6);
    }

    #[test]
    fn rejects_unknown_and_conflicting_ids() {
        let mut registry = RenderRegistry::new();
        let pipeline = registry.add_pipeline(FakePipeline(1));
        let cube = registry.add_drawable(FakeMesh(10, 36));
        let quad = registry.add_drawable(FakeMesh(20, 6));

        assert!(registry.add_instances(PipelineId(5), cube, 1).is_err());
        assert!(registry.add_instances(pipeline, DrawableId(9), 1).is_err());

        registry.add_instances(pipeline, cube, 1).unwrap();
        assert!(matches!(
            registry.add_instances(pipeline, quad, 1),
            Err(EngineError::Registry(_))
        ));
    }

    #[test]
    fn empty_registry_has_no_draws() {
        let registry: RenderRegistry<FakePipeline, FakeMesh> = RenderRegistry::new();
        assert!(registry.draw_calls().is_empty());
    }
}
