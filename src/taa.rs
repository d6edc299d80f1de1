//! Temporal accumulation for the stochastic render paths.
//!
//! Each eye owns a scene target plus two ping-pong texture pairs holding the
//! accumulated color average and the reprojected world positions. Per frame
//! the chain is: render the scene into the eye's FBO, then either warp the
//! history into the back slots (camera moved), swap the slots (camera
//! still), or bootstrap (no history yet); then blend history and current
//! frame in the average pass and present the result.
//!
//! The invariant throughout is that the *front* slot of each pair holds the
//! latest accumulated history: the warp pass reads front and writes back,
//! the average pass reads back and writes front, and the display pass
//! samples front.

use std::rc::Rc;

use nalgebra_glm as glm;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;
use crate::buffer::{BufferObject, StorageFlags};
use crate::context::check_gl_error;
use crate::error::{Error, Result};
use crate::framebuffer::FrameBuffer;
use crate::program::Program;
use crate::texture::{Texture, TextureParams};
use crate::vao::VertexArrayObject;

/// Element-wise threshold deciding whether the camera moved since the last
/// frame.
pub(crate) const VIEW_CHANGE_EPSILON: f32 = 1e-3;

// positions and texcoords of two fullscreen triangles
static QUAD_VERTICES: [f32; 24] = [
    -1.0, 1.0, 0.0, 1.0, //
    -1.0, -1.0, 0.0, 0.0, //
    1.0, -1.0, 1.0, 0.0, //
    -1.0, 1.0, 0.0, 1.0, //
    1.0, -1.0, 1.0, 0.0, //
    1.0, 1.0, 1.0, 1.0, //
];

/// Strictly matrix-wise absolute comparison, deliberately not a rotational
/// metric.
pub(crate) fn view_changed(a: &glm::Mat4, b: &glm::Mat4, epsilon: f32) -> bool {
    a.iter().zip(b.iter()).any(|(x, y)| (x - y).abs() >= epsilon)
}

/// Two textures where one is read and the other written each pass, with the
/// roles swapped by `swap`.
pub(crate) struct PingPong<T> {
    slots: [T; 2],
    front: usize,
}

impl<T> PingPong<T> {
    pub fn new(a: T, b: T) -> PingPong<T> {
        PingPong {
            slots: [a, b],
            front: 0,
        }
    }

    pub fn front(&self) -> &T {
        &self.slots[self.front]
    }

    pub fn back(&self) -> &T {
        &self.slots[1 - self.front]
    }

    pub fn swap(&mut self) {
        self.front = 1 - self.front;
    }

    pub fn slots(&self) -> &[T; 2] {
        &self.slots
    }
}

/// What the accumulation chain does before the average pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum AccumulationStep {
    /// No usable history: the average pass reads the same slot it writes.
    Bootstrap,
    /// Camera moved: reproject history into the back slots.
    Warp,
    /// Camera still: swap the slot roles, contents untouched.
    Reuse,
}

pub(crate) fn plan_accumulation(frame_count: i32, view_changed: bool) -> AccumulationStep {
    if frame_count <= 1 {
        AccumulationStep::Bootstrap
    } else if view_changed {
        AccumulationStep::Warp
    } else {
        AccumulationStep::Reuse
    }
}

/// Per-eye temporal matrices and frame counter.
pub(crate) struct EyeState {
    pub pvmat: glm::Mat4,
    pub prev_pvmat: glm::Mat4,
    pub frame_count: i32,
}

impl Default for EyeState {
    fn default() -> EyeState {
        EyeState {
            pvmat: glm::Mat4::identity(),
            prev_pvmat: glm::Mat4::identity(),
            frame_count: 0,
        }
    }
}

/// Rotates the matrices at the start of an accumulated frame. The counter
/// increments first; on the resulting frame 1 the previous matrix bootstraps
/// to the incoming one, so the very first view-change test after a reset
/// compares the matrix with itself.
pub(crate) fn begin_frame(state: &mut EyeState, proj_view: &glm::Mat4) {
    state.frame_count += 1;
    if state.frame_count > 1 {
        state.prev_pvmat = state.pvmat;
    } else {
        state.prev_pvmat = *proj_view;
    }
    state.pvmat = *proj_view;
}

/// Per-eye render targets and history textures.
pub(crate) struct EyeTextures {
    pub warp_avg: PingPong<Rc<Texture>>,
    pub warp_xyz: PingPong<Rc<Texture>>,
    pub current_frame: Rc<Texture>,
    pub depth: Rc<Texture>,
    pub scene_fbo: FrameBuffer,
}

fn make_eye_textures(gl: &Rc<Gl>, width: i32, height: i32) -> EyeTextures {
    let params = TextureParams::nearest_clamped();
    let color = || {
        Rc::new(Texture::new(
            gl,
            width,
            height,
            gl::RGBA32F,
            gl::RGBA,
            gl::FLOAT,
            &params,
        ))
    };
    let depth = Rc::new(Texture::new(
        gl,
        width,
        height,
        gl::DEPTH_COMPONENT32F,
        gl::DEPTH_COMPONENT,
        gl::FLOAT,
        &params,
    ));

    let current_frame = color();
    let mut scene_fbo = FrameBuffer::new(gl);
    scene_fbo.bind();
    scene_fbo.attach_color(current_frame.clone(), 0);
    scene_fbo.attach_depth(depth.clone());

    EyeTextures {
        warp_avg: PingPong::new(color(), color()),
        warp_xyz: PingPong::new(color(), color()),
        current_frame,
        depth,
        scene_fbo,
    }
}

pub(crate) struct TemporalPipeline {
    gl: Rc<Gl>,
    warp_prog: Program,
    avg_prog: Program,
    display_prog: Program,
    quad_vao: VertexArrayObject,
    // the VAO references the quad buffer by name only
    _quad_vbo: BufferObject,
    sum_fbo: FrameBuffer,
    eyes: Vec<EyeTextures>,
    states: Vec<EyeState>,
    width: i32,
    height: i32,
}

impl TemporalPipeline {
    pub(crate) fn new(
        gl: &Rc<Gl>,
        eye_count: usize,
        width: i32,
        height: i32,
    ) -> Result<TemporalPipeline> {
        assert!(eye_count >= 1, "at least one eye is required");

        // warp the previous average frame to the current view
        let mut warp_prog = Program::new(gl);
        warp_prog.load_vert_frag("shader/warp_vert.glsl", "shader/warp_frag.glsl")?;
        // blend the warped history with the current frame
        let mut avg_prog = Program::new(gl);
        avg_prog.load_vert_frag("shader/avg_vert.glsl", "shader/avg_frag.glsl")?;
        // present the accumulated result
        let mut display_prog = Program::new(gl);
        display_prog.load_vert_frag("shader/avg_vert.glsl", "shader/display_frag.glsl")?;

        let quad_vbo = BufferObject::from_slice(
            gl,
            gl::ARRAY_BUFFER,
            &QUAD_VERTICES,
            StorageFlags::empty(),
        );
        let quad_vao = VertexArrayObject::new(gl);
        quad_vao.attach_vertex_buffer(0, &quad_vbo, 0, 4 * 4);
        quad_vao.set_float_attribute(0, 0, 2, 0);
        quad_vao.set_float_attribute(1, 0, 2, 2 * 4);

        let mut eyes = Vec::with_capacity(eye_count);
        for eye in 0..eye_count {
            let textures = make_eye_textures(gl, width, height);
            if !textures.scene_fbo.is_complete() {
                error!("scene framebuffer for eye {} is not complete", eye);
                return Err(Error::IncompleteFramebuffer(textures.scene_fbo.status()));
            }
            eyes.push(textures);
        }

        // attached to eye 0 up front purely so the FBO is complete at
        // creation; the average pass re-points both slots every frame
        let mut sum_fbo = FrameBuffer::new(gl);
        sum_fbo.bind();
        sum_fbo.attach_color(eyes[0].warp_avg.back().clone(), 0);
        sum_fbo.attach_color(eyes[0].warp_xyz.back().clone(), 1);

        let mut pipeline = TemporalPipeline {
            gl: gl.clone(),
            warp_prog,
            avg_prog,
            display_prog,
            quad_vao,
            _quad_vbo: quad_vbo,
            sum_fbo,
            eyes,
            states: (0..eye_count).map(|_| EyeState::default()).collect(),
            width,
            height,
        };
        for eye in 0..eye_count {
            pipeline.reset_history(eye);
        }
        Ok(pipeline)
    }

    pub(crate) fn scene_fbo(&self, eye: usize) -> &FrameBuffer {
        &self.eyes[eye].scene_fbo
    }

    pub(crate) fn begin_eye_frame(&mut self, eye: usize, proj_view: &glm::Mat4) {
        begin_frame(&mut self.states[eye], proj_view);
    }

    /// Runs warp/average/display for one eye after its scene FBO has been
    /// rendered, presenting into `present_fbo`.
    pub(crate) fn accumulate_and_present(
        &mut self,
        eye: usize,
        present_fbo: GLuint,
        viewport: &glm::Vec4,
    ) {
        check_gl_error(&self.gl, "taa: begin");
        unsafe {
            self.gl.Disable(gl::BLEND);
            self.gl.Disable(gl::DEPTH_TEST);
        }

        let changed = {
            let state = &self.states[eye];
            view_changed(&state.pvmat, &state.prev_pvmat, VIEW_CHANGE_EPSILON)
        };
        let step = plan_accumulation(self.states[eye].frame_count, changed);

        match step {
            AccumulationStep::Bootstrap => {}
            AccumulationStep::Warp => self.run_warp_pass(eye),
            AccumulationStep::Reuse => {
                let t = &mut self.eyes[eye];
                t.warp_avg.swap();
                t.warp_xyz.swap();
            }
        }

        self.run_average_pass(eye, step, changed);
        self.run_display_pass(eye, present_fbo, viewport);
        check_gl_error(&self.gl, "taa: accumulate");
    }

    fn draw_fullscreen_quad(&self) {
        self.quad_vao.bind();
        unsafe {
            self.gl.DrawArrays(gl::TRIANGLES, 0, 6);
        }
        self.quad_vao.unbind();
    }

    fn run_warp_pass(&self, eye: usize) {
        let t = &self.eyes[eye];
        let pv = self.states[eye].pvmat;

        t.warp_avg.back().clear_to_zero();
        t.warp_xyz.back().clear_to_zero();

        self.warp_prog.bind();
        t.warp_avg.front().bind_to_unit(0);
        self.warp_prog.set_uniform("colorTexture", 0i32);
        t.warp_xyz.front().bind_to_unit(1);
        self.warp_prog.set_uniform("xyzTexture", 1i32);
        self.warp_prog.set_uniform("currentViewMatrix", pv);

        t.warp_avg.back().bind_image_write(0, gl::RGBA32F);
        t.warp_xyz.back().bind_image_write(1, gl::RGBA32F);

        self.draw_fullscreen_quad();
        unsafe {
            self.gl
                .MemoryBarrier(gl::SHADER_IMAGE_ACCESS_BARRIER_BIT | gl::TEXTURE_FETCH_BARRIER_BIT);
        }
    }

    fn run_average_pass(&mut self, eye: usize, step: AccumulationStep, changed: bool) {
        // on the bootstrap frame there is no warped history, the pass reads
        // the slot it is about to overwrite
        let (in_avg, in_xyz) = {
            let t = &self.eyes[eye];
            match step {
                AccumulationStep::Bootstrap => {
                    (t.warp_avg.front().clone(), t.warp_xyz.front().clone())
                }
                _ => (t.warp_avg.back().clone(), t.warp_xyz.back().clone()),
            }
        };
        let (out_avg, out_xyz) = {
            let t = &self.eyes[eye];
            (t.warp_avg.front().clone(), t.warp_xyz.front().clone())
        };
        let current_frame = self.eyes[eye].current_frame.clone();
        let depth = self.eyes[eye].depth.clone();
        let inv_proj_view = glm::inverse(&self.states[eye].pvmat);

        self.avg_prog.bind();
        self.avg_prog.set_uniform("invProjViewMat", inv_proj_view);
        self.avg_prog.set_uniform("viewChanged", changed);

        current_frame.bind_to_unit(0);
        self.avg_prog.set_uniform("currentColorTexture", 0i32);
        in_xyz.bind_to_unit(1);
        self.avg_prog.set_uniform("warpedXYZTexture", 1i32);
        depth.bind_to_unit(2);
        self.avg_prog.set_uniform("currentDepthTexture", 2i32);
        in_avg.bind_to_unit(3);
        self.avg_prog.set_uniform("warpedColorTexture", 3i32);

        self.sum_fbo.bind();
        unsafe {
            self.gl.Viewport(0, 0, self.width, self.height);
        }
        self.sum_fbo.attach_color(out_avg, 0);
        self.sum_fbo.attach_color(out_xyz, 1);
        self.sum_fbo.set_draw_buffers(2);

        self.draw_fullscreen_quad();
        unsafe {
            self.gl
                .MemoryBarrier(gl::SHADER_IMAGE_ACCESS_BARRIER_BIT | gl::TEXTURE_FETCH_BARRIER_BIT);
        }
    }

    fn run_display_pass(&self, eye: usize, present_fbo: GLuint, viewport: &glm::Vec4) {
        unsafe {
            self.gl.BindFramebuffer(gl::FRAMEBUFFER, present_fbo);
            self.gl.Viewport(
                viewport.x as GLint,
                viewport.y as GLint,
                viewport.z as GLint,
                viewport.w as GLint,
            );
            self.gl.Disable(gl::DEPTH_TEST);
        }
        self.display_prog.bind();
        self.eyes[eye].warp_avg.front().bind_to_unit(0);
        self.display_prog.set_uniform("textureSum", 0i32);
        self.draw_fullscreen_quad();
    }

    /// Clears the eye's history without reallocating anything.
    pub(crate) fn reset_history(&mut self, eye: usize) {
        let t = &self.eyes[eye];
        for tex in t.warp_avg.slots().iter().chain(t.warp_xyz.slots().iter()) {
            tex.clear_to_zero();
        }
        let state = &mut self.states[eye];
        state.frame_count = 0;
        state.prev_pvmat = state.pvmat; // keep current for the next compare
    }

    /// Reallocates the eye's textures and scene FBO for a new resolution and
    /// updates the cached dimensions.
    pub(crate) fn resize(&mut self, eye: usize, new_width: i32, new_height: i32) {
        let textures = make_eye_textures(&self.gl, new_width, new_height);
        if !textures.scene_fbo.is_complete() {
            error!("scene framebuffer for eye {} incomplete after resize", eye);
        }
        self.eyes[eye] = textures;

        self.width = new_width;
        self.height = new_height;
        self.states[eye].frame_count = 0;
    }
}

// TESTS -------------------------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_changed_epsilon_edges() {
        let a = glm::Mat4::identity();
        let mut b = a;
        assert!(!view_changed(&a, &b, VIEW_CHANGE_EPSILON));

        // just under the threshold: still
        b[(1, 2)] = 0.999e-3;
        assert!(!view_changed(&a, &b, VIEW_CHANGE_EPSILON));

        // a difference of exactly epsilon counts as changed
        b[(1, 2)] = 1e-3;
        assert!(view_changed(&a, &b, VIEW_CHANGE_EPSILON));

        // a single large translation component is enough
        let mut c = a;
        c[(0, 3)] = 1.0;
        assert!(view_changed(&a, &c, VIEW_CHANGE_EPSILON));
    }

    #[test]
    fn test_plan_accumulation() {
        assert_eq!(plan_accumulation(0, false), AccumulationStep::Bootstrap);
        assert_eq!(plan_accumulation(1, true), AccumulationStep::Bootstrap);
        assert_eq!(plan_accumulation(2, true), AccumulationStep::Warp);
        assert_eq!(plan_accumulation(2, false), AccumulationStep::Reuse);
        assert_eq!(plan_accumulation(100, false), AccumulationStep::Reuse);
    }

    #[test]
    fn test_begin_frame_bootstrap_rule() {
        let mut state = EyeState::default();
        let pv1 = glm::translation(&glm::vec3(1.0, 0.0, 0.0));

        // frame 1 bootstraps prev to the incoming matrix
        begin_frame(&mut state, &pv1);
        assert_eq!(state.frame_count, 1);
        assert_eq!(state.prev_pvmat, pv1);
        assert_eq!(state.pvmat, pv1);
        assert!(!view_changed(
            &state.pvmat,
            &state.prev_pvmat,
            VIEW_CHANGE_EPSILON
        ));

        // frame 2 rotates normally
        let pv2 = glm::translation(&glm::vec3(2.0, 0.0, 0.0));
        begin_frame(&mut state, &pv2);
        assert_eq!(state.frame_count, 2);
        assert_eq!(state.prev_pvmat, pv1);
        assert_eq!(state.pvmat, pv2);
        assert!(view_changed(
            &state.pvmat,
            &state.prev_pvmat,
            VIEW_CHANGE_EPSILON
        ));
    }

    #[test]
    fn test_ping_pong_swap() {
        let mut pair = PingPong::new('a', 'b');
        assert_eq!((*pair.front(), *pair.back()), ('a', 'b'));
        pair.swap();
        assert_eq!((*pair.front(), *pair.back()), ('b', 'a'));
        pair.swap();
        assert_eq!((*pair.front(), *pair.back()), ('a', 'b'));
        // the slots themselves never move
        assert_eq!(pair.slots(), &['a', 'b']);
    }

    #[test]
    fn test_static_camera_sequence_reuses_history() {
        // two renders with the identical camera: frame 2 must swap the pair
        // without any warp work
        let mut state = EyeState::default();
        let pv = glm::Mat4::identity();

        begin_frame(&mut state, &pv);
        let changed = view_changed(&state.pvmat, &state.prev_pvmat, VIEW_CHANGE_EPSILON);
        assert_eq!(
            plan_accumulation(state.frame_count, changed),
            AccumulationStep::Bootstrap
        );

        begin_frame(&mut state, &pv);
        let changed = view_changed(&state.pvmat, &state.prev_pvmat, VIEW_CHANGE_EPSILON);
        assert_eq!(
            plan_accumulation(state.frame_count, changed),
            AccumulationStep::Reuse
        );
    }

    #[test]
    fn test_moving_camera_sequence_warps_history() {
        // second render translated by one unit: frame 2 must warp
        let mut state = EyeState::default();
        begin_frame(&mut state, &glm::Mat4::identity());
        begin_frame(&mut state, &glm::translation(&glm::vec3(1.0, 0.0, 0.0)));
        let changed = view_changed(&state.pvmat, &state.prev_pvmat, VIEW_CHANGE_EPSILON);
        assert_eq!(
            plan_accumulation(state.frame_count, changed),
            AccumulationStep::Warp
        );
    }
}
