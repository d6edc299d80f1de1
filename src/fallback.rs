//! Fallback GPU radix sorter for devices without shader-subgroup support.
//!
//! Sorts `(key, value)` pairs ascending by 32-bit key over opaque GPU
//! buffers, in four 8-bit passes of count / prefix-scan / scatter kernels.
//! Scratch buffers are sized once for the capacity given at construction;
//! after the even number of passes the sorted data is back in the caller's
//! buffers.

use std::mem;
use std::rc::Rc;

use crate::api as gl;
use crate::api::Gl;
use crate::buffer::{BufferObject, StorageFlags};
use crate::error::Result;
use crate::program::Program;
use crate::sort::div_round_up;

const LOCAL_SIZE: u32 = 256;
const BINS: u32 = 256;
const PASSES: u32 = 4;

pub(crate) struct Sorter {
    gl: Rc<Gl>,
    count_prog: Program,
    scan_prog: Program,
    scatter_prog: Program,
    scratch_keys: BufferObject,
    scratch_vals: BufferObject,
    counts: BufferObject,
    capacity: usize,
}

impl Sorter {
    pub(crate) fn new(gl: &Rc<Gl>, capacity: usize) -> Result<Sorter> {
        let mut count_prog = Program::new(gl);
        count_prog.load_compute("shader/radixsort_count.glsl")?;
        let mut scan_prog = Program::new(gl);
        scan_prog.load_compute("shader/radixsort_scan.glsl")?;
        let mut scatter_prog = Program::new(gl);
        scatter_prog.load_compute("shader/radixsort_scatter.glsl")?;

        let pair_bytes = capacity * mem::size_of::<u32>();
        let count_bytes =
            (div_round_up(capacity.max(1) as u32, LOCAL_SIZE) * BINS) as usize
                * mem::size_of::<u32>();

        Ok(Sorter {
            gl: gl.clone(),
            count_prog,
            scan_prog,
            scatter_prog,
            scratch_keys: BufferObject::with_capacity(
                gl,
                gl::SHADER_STORAGE_BUFFER,
                pair_bytes,
                StorageFlags::empty(),
            ),
            scratch_vals: BufferObject::with_capacity(
                gl,
                gl::SHADER_STORAGE_BUFFER,
                pair_bytes,
                StorageFlags::empty(),
            ),
            counts: BufferObject::with_capacity(
                gl,
                gl::SHADER_STORAGE_BUFFER,
                count_bytes,
                StorageFlags::empty(),
            ),
            capacity,
        })
    }

    /// Sorts the first `count` pairs of `keys`/`vals` in place.
    pub(crate) fn sort(&self, keys: &BufferObject, vals: &BufferObject, count: u32) {
        assert!(
            count as usize <= self.capacity,
            "sort count exceeds sorter capacity"
        );
        if count == 0 {
            return;
        }
        let num_workgroups = div_round_up(count, LOCAL_SIZE);

        for pass in 0..PASSES {
            // even passes read the caller's buffers, odd read the scratch
            // pair, so pass parity decides the binding direction
            let (in_keys, in_vals, out_keys, out_vals) = if pass % 2 == 0 {
                (keys, vals, &self.scratch_keys, &self.scratch_vals)
            } else {
                (&self.scratch_keys, &self.scratch_vals, keys, vals)
            };
            let shift = 8 * pass;

            self.count_prog.bind();
            self.count_prog.set_uniform("g_num_elements", count);
            self.count_prog.set_uniform("g_shift", shift);
            in_keys.bind_base(0);
            self.counts.bind_base(1);
            unsafe {
                self.gl.DispatchCompute(num_workgroups, 1, 1);
                self.gl.MemoryBarrier(gl::SHADER_STORAGE_BARRIER_BIT);
            }

            self.scan_prog.bind();
            self.scan_prog.set_uniform("g_num_workgroups", num_workgroups);
            self.counts.bind_base(0);
            unsafe {
                self.gl.DispatchCompute(1, 1, 1);
                self.gl.MemoryBarrier(gl::SHADER_STORAGE_BARRIER_BIT);
            }

            self.scatter_prog.bind();
            self.scatter_prog.set_uniform("g_num_elements", count);
            self.scatter_prog.set_uniform("g_shift", shift);
            in_keys.bind_base(0);
            in_vals.bind_base(1);
            out_keys.bind_base(2);
            out_vals.bind_base(3);
            self.counts.bind_base(4);
            unsafe {
                self.gl.DispatchCompute(num_workgroups, 1, 1);
                self.gl.MemoryBarrier(gl::SHADER_STORAGE_BARRIER_BIT);
            }
        }
    }
}
