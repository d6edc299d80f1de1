//! GPU depth-sort pipeline for the alpha-blending render path.
//!
//! Each frame runs four stages against the cloud's position buffer:
//!
//! 1. a compute pre-pass projects every splat, culls against the frustum,
//!    encodes view-space depth into a 32-bit key and appends
//!    `(key, source index)` through a single atomic counter;
//! 2. the counter is read back synchronously into `sort_count`;
//! 3. the packed prefix is radix-sorted ascending by key, either with the
//!    subgroup multi-pass kernels or with the fallback sorter;
//! 4. the sorted indices are copied GPU-to-GPU into the splat VAO's element
//!    buffer.
//!
//! Stages are separated by full memory barriers on the shader-storage and
//! atomic-counter domains; the final buffer copy relies on the copy op's
//! implicit ordering.

use std::mem;
use std::rc::Rc;

use nalgebra_glm as glm;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;
use crate::buffer::{BufferObject, StorageFlags};
use crate::context::check_gl_error;
use crate::error::Result;
use crate::fallback::Sorter;
use crate::program::Program;

/// Bits consumed per radix pass.
const RADIX_BITS: u32 = 8;
/// Scatter passes over the 32-bit keys. Even, so the sorted data lands back
/// in the primary buffer pair.
pub(crate) const RADIX_PASSES: u32 = 4;
const RADIX_SORT_BINS: u32 = 256;
const PRE_SORT_LOCAL_SIZE: u32 = 256;
/// Largest encodable depth key, passed to the pre-sort kernel as `keyMax`.
pub(crate) const KEY_MAX: u32 = u32::max_value();

pub(crate) fn div_round_up(value: u32, divisor: u32) -> u32 {
    (value + divisor - 1) / divisor
}

/// Which ping-pong pair holds the sorted data after a number of scatter
/// passes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ResultSide {
    Primary,
    Secondary,
}

pub(crate) fn result_side(passes: u32) -> ResultSide {
    if passes % 2 == 0 {
        ResultSide::Primary
    } else {
        ResultSide::Secondary
    }
}

/// CPU reference for the key the pre-sort kernel emits for a splat at
/// view-space depth `view_z` (negative in front of the camera). The depth is
/// normalized over the far..near range and mapped monotonically onto
/// `[0, key_max]`, so an ascending key sort orders splats back-to-front.
pub(crate) fn encode_depth_key(view_z: f32, near_far: &glm::Vec2, key_max: u32) -> u32 {
    let near = near_far.x;
    let far = near_far.y;
    let normalized = ((view_z + far) / (far - near)).max(0.0).min(1.0);
    (f64::from(normalized) * f64::from(key_max)) as u32
}

enum SortVariant {
    /// Subgroup-accelerated multi-pass radix kernels with their histogram
    /// and secondary ping-pong buffers.
    MultiPass {
        sort_prog: Program,
        histogram_prog: Program,
        key_buffer2: BufferObject,
        val_buffer2: BufferObject,
        histogram_buffer: BufferObject,
    },
    /// External-style sorter working in place over the primary pair.
    Fallback(Sorter),
}

pub(crate) struct SortPipeline {
    gl: Rc<Gl>,
    pre_sort_prog: Program,
    variant: SortVariant,
    key_buffer: BufferObject,
    val_buffer: BufferObject,
    pos_buffer: BufferObject,
    atomic_counter_buffer: BufferObject,
    num_gaussians: usize,
    pub(crate) num_blocks_per_workgroup: u32,
    /// Number of splats that survived culling in the last `sort` call; the
    /// element-buffer prefix of this length is sorted back-to-front.
    pub(crate) sort_count: u32,
}

impl SortPipeline {
    pub(crate) fn new(
        gl: &Rc<Gl>,
        positions: &[glm::Vec4],
        use_multi_radix_sort: bool,
        num_blocks_per_workgroup: u32,
    ) -> Result<SortPipeline> {
        assert!(
            (1..=1024).contains(&num_blocks_per_workgroup),
            "num_blocks_per_workgroup must be in 1..=1024"
        );
        let num_gaussians = positions.len();

        let mut pre_sort_prog = Program::new(gl);
        pre_sort_prog.load_compute("shader/presort_compute.glsl")?;

        let key_bytes = num_gaussians * mem::size_of::<u32>();
        let key_buffer = BufferObject::with_capacity(
            gl,
            gl::SHADER_STORAGE_BUFFER,
            key_bytes,
            StorageFlags::DYNAMIC_STORAGE,
        );
        let val_buffer = BufferObject::with_capacity(
            gl,
            gl::SHADER_STORAGE_BUFFER,
            key_bytes,
            StorageFlags::DYNAMIC_STORAGE,
        );
        let pos_buffer = BufferObject::from_slice(
            gl,
            gl::SHADER_STORAGE_BUFFER,
            positions,
            StorageFlags::empty(),
        );
        let atomic_counter_buffer = BufferObject::from_slice(
            gl,
            gl::ATOMIC_COUNTER_BUFFER,
            &[0u32],
            StorageFlags::DYNAMIC_STORAGE | StorageFlags::MAP_READ,
        );

        let variant = if use_multi_radix_sort {
            info!("sorting with the subgroup multi-pass radix kernels");
            let mut sort_prog = Program::new(gl);
            sort_prog.load_compute("shader/multi_radixsort.glsl")?;
            let mut histogram_prog = Program::new(gl);
            histogram_prog.load_compute("shader/multi_radixsort_histograms.glsl")?;

            let num_workgroups = div_round_up(num_gaussians as u32, num_blocks_per_workgroup);
            let histogram_bytes =
                (num_workgroups * RADIX_SORT_BINS) as usize * mem::size_of::<u32>();

            SortVariant::MultiPass {
                sort_prog,
                histogram_prog,
                key_buffer2: BufferObject::with_capacity(
                    gl,
                    gl::SHADER_STORAGE_BUFFER,
                    key_bytes,
                    StorageFlags::DYNAMIC_STORAGE,
                ),
                val_buffer2: BufferObject::with_capacity(
                    gl,
                    gl::SHADER_STORAGE_BUFFER,
                    key_bytes,
                    StorageFlags::DYNAMIC_STORAGE,
                ),
                histogram_buffer: BufferObject::with_capacity(
                    gl,
                    gl::SHADER_STORAGE_BUFFER,
                    histogram_bytes,
                    StorageFlags::DYNAMIC_STORAGE,
                ),
            }
        } else {
            info!("sorting with the fallback sorter");
            SortVariant::Fallback(Sorter::new(gl, num_gaussians)?)
        };

        Ok(SortPipeline {
            gl: gl.clone(),
            pre_sort_prog,
            variant,
            key_buffer,
            val_buffer,
            pos_buffer,
            atomic_counter_buffer,
            num_gaussians,
            num_blocks_per_workgroup,
            sort_count: 0,
        })
    }

    /// Runs the full sort and overwrites the prefix `[0, sort_count)` of
    /// `element_buffer` with back-to-front splat indices.
    pub(crate) fn sort(
        &mut self,
        camera_mat: &glm::Mat4,
        proj_mat: &glm::Mat4,
        near_far: &glm::Vec2,
        element_buffer: &BufferObject,
    ) {
        if self.num_gaussians == 0 {
            self.sort_count = 0;
            return;
        }
        check_gl_error(&self.gl, "sort: begin");

        let model_view_mat = glm::inverse(camera_mat);

        // Stage A: project, cull, compact (key, index) pairs
        self.pre_sort_prog.bind();
        self.pre_sort_prog
            .set_uniform("modelViewProj", proj_mat * model_view_mat);
        self.pre_sort_prog.set_uniform("nearFar", *near_far);
        self.pre_sort_prog.set_uniform("keyMax", KEY_MAX);

        // reset the counter back to zero
        self.atomic_counter_buffer.update(&[0u32]);

        self.pos_buffer.bind_base(0); // readonly
        self.key_buffer.bind_base(1); // writeonly
        self.val_buffer.bind_base(2); // writeonly
        self.atomic_counter_buffer.bind_base(4);

        unsafe {
            self.gl.DispatchCompute(
                div_round_up(self.num_gaussians as u32, PRE_SORT_LOCAL_SIZE),
                1,
                1,
            );
            self.gl
                .MemoryBarrier(gl::SHADER_STORAGE_BARRIER_BIT | gl::ATOMIC_COUNTER_BARRIER_BIT);
        }
        check_gl_error(&self.gl, "sort: pre-sort");

        // Stage B: synchronous count read-back; the CPU bubble here is
        // amortized by the sort itself
        let mut counter = [0u32];
        self.atomic_counter_buffer.read_into(&mut counter);
        self.sort_count = counter[0];
        assert!(
            self.sort_count as usize <= self.num_gaussians,
            "pre-sort emitted more splats than the cloud holds"
        );
        check_gl_error(&self.gl, "sort: get-count");

        // Stage C: radix sort of the packed prefix
        match &self.variant {
            SortVariant::MultiPass {
                sort_prog,
                histogram_prog,
                key_buffer2,
                val_buffer2,
                histogram_buffer,
            } => {
                let num_elements = self.sort_count;
                let num_workgroups = div_round_up(num_elements, self.num_blocks_per_workgroup);

                sort_prog.bind();
                sort_prog.set_uniform("g_num_elements", num_elements);
                sort_prog.set_uniform("g_num_workgroups", num_workgroups);
                sort_prog.set_uniform("g_num_blocks_per_workgroup", self.num_blocks_per_workgroup);

                histogram_prog.bind();
                histogram_prog.set_uniform("g_num_elements", num_elements);
                histogram_prog
                    .set_uniform("g_num_blocks_per_workgroup", self.num_blocks_per_workgroup);

                for pass in 0..RADIX_PASSES {
                    histogram_prog.bind();
                    histogram_prog.set_uniform("g_shift", RADIX_BITS * pass);

                    // even passes read keys from the primary buffer
                    if pass % 2 == 0 {
                        self.key_buffer.bind_base(0);
                    } else {
                        key_buffer2.bind_base(0);
                    }
                    histogram_buffer.bind_base(1);

                    unsafe {
                        self.gl.DispatchCompute(num_workgroups, 1, 1);
                        self.gl.MemoryBarrier(gl::SHADER_STORAGE_BARRIER_BIT);
                    }

                    sort_prog.bind();
                    sort_prog.set_uniform("g_shift", RADIX_BITS * pass);

                    if pass % 2 == 0 {
                        self.key_buffer.bind_base(0);
                        key_buffer2.bind_base(1);
                        self.val_buffer.bind_base(2);
                        val_buffer2.bind_base(3);
                    } else {
                        key_buffer2.bind_base(0);
                        self.key_buffer.bind_base(1);
                        val_buffer2.bind_base(2);
                        self.val_buffer.bind_base(3);
                    }
                    histogram_buffer.bind_base(4);

                    unsafe {
                        self.gl.DispatchCompute(num_workgroups, 1, 1);
                        self.gl.MemoryBarrier(gl::SHADER_STORAGE_BARRIER_BIT);
                    }
                }
                check_gl_error(&self.gl, "sort: radix passes");
            }
            SortVariant::Fallback(sorter) => {
                sorter.sort(&self.key_buffer, &self.val_buffer, self.sort_count);
                check_gl_error(&self.gl, "sort: fallback sorter");
            }
        }

        // Stage D: promote the winning value buffer into the element buffer
        let sorted_values = match &self.variant {
            SortVariant::MultiPass { val_buffer2, .. } => match result_side(RADIX_PASSES) {
                ResultSide::Primary => &self.val_buffer,
                ResultSide::Secondary => val_buffer2,
            },
            SortVariant::Fallback(_) => &self.val_buffer,
        };
        unsafe {
            self.gl.CopyNamedBufferSubData(
                sorted_values.obj(),
                element_buffer.obj(),
                0,
                0,
                (self.sort_count as usize * mem::size_of::<u32>()) as GLsizeiptr,
            );
        }
        check_gl_error(&self.gl, "sort: copy-sorted");
    }
}

// TESTS -------------------------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;

    fn argsort_by_key(view_zs: &[f32], near_far: &glm::Vec2) -> Vec<usize> {
        let mut order: Vec<usize> = (0..view_zs.len()).collect();
        order.sort_by_key(|&i| encode_depth_key(view_zs[i], near_far, KEY_MAX));
        order
    }

    #[test]
    fn test_div_round_up() {
        assert_eq!(div_round_up(0, 256), 0);
        assert_eq!(div_round_up(1, 256), 1);
        assert_eq!(div_round_up(256, 256), 1);
        assert_eq!(div_round_up(257, 256), 2);
        assert_eq!(div_round_up(1024, 1024), 1);
    }

    #[test]
    fn test_result_side_parity() {
        assert_eq!(result_side(0), ResultSide::Primary);
        assert_eq!(result_side(1), ResultSide::Secondary);
        assert_eq!(result_side(3), ResultSide::Secondary);
        assert_eq!(result_side(4), ResultSide::Primary);
        // the pipeline's pass count must keep the result in the primary pair
        assert_eq!(result_side(RADIX_PASSES), ResultSide::Primary);
    }

    #[test]
    fn test_depth_key_monotone_in_view_z() {
        let near_far = glm::vec2(0.1, 100.0);
        let zs = [-99.0, -50.0, -10.0, -5.0, -2.0, -1.0, -0.2];
        let keys: Vec<u32> = zs
            .iter()
            .map(|&z| encode_depth_key(z, &near_far, KEY_MAX))
            .collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "keys must grow toward the camera");
        }
    }

    #[test]
    fn test_depth_key_clamps_to_range() {
        let near_far = glm::vec2(0.1, 100.0);
        assert_eq!(encode_depth_key(-1000.0, &near_far, KEY_MAX), 0);
        assert_eq!(encode_depth_key(5.0, &near_far, KEY_MAX), KEY_MAX);
    }

    #[test]
    fn test_back_to_front_order_matches_reference_scene() {
        // four splats on the view axis; ascending keys must order them
        // farthest first
        let near_far = glm::vec2(0.1, 100.0);
        let zs = [-1.0, -5.0, -2.0, -10.0];
        assert_eq!(argsort_by_key(&zs, &near_far), vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_key_sort_matches_cpu_depth_sort() {
        let near_far = glm::vec2(0.1, 100.0);
        let zs = [
            -73.25, -0.5, -12.0, -99.9, -42.125, -3.75, -41.0, -88.5, -27.0, -13.5,
        ];
        let by_key = argsort_by_key(&zs, &near_far);
        let mut by_depth: Vec<usize> = (0..zs.len()).collect();
        by_depth.sort_by(|&a, &b| zs[a].partial_cmp(&zs[b]).unwrap());
        assert_eq!(by_key, by_depth);
    }
}
