//! The splat renderer façade: owns the GPU resources of the chosen render
//! mode and drives the per-frame pipeline.

use std::ptr;
use std::rc::Rc;

use config::Config;
use nalgebra_glm as glm;

use crate::api as gl;
use crate::api::types::*;
use crate::api::Gl;
use crate::cloud::GaussianCloud;
use crate::context::{check_gl_error, GlCore};
use crate::error::Result;
use crate::layout::{build_splat_geometry, SplatGeometry};
use crate::program::Program;
use crate::sort::SortPipeline;
use crate::taa::TemporalPipeline;

pub const DEFAULT_NUM_BLOCKS_PER_WORKGROUP: u32 = 1024;

/// How splat transparency is resolved.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RenderMode {
    /// Alpha blending over a per-frame back-to-front GPU depth sort.
    AlphaBlend,
    /// Stochastic transparency; no sort, needs a per-frame random seed.
    Stochastic,
    /// Stochastic transparency with the pop-free shader variants.
    StochasticPopfree,
}

/// Construction-time configuration. Everything the renderer needs arrives
/// here; there is no persisted state and no environment lookup.
#[derive(Clone, Debug)]
pub struct RendererOptions {
    pub srgb: bool,
    pub force_fallback_sort: bool,
    pub mode: RenderMode,
    pub eye_count: usize,
    pub width: i32,
    pub height: i32,
    pub taa: bool,
    /// Blocks each radix-sort workgroup consumes; must stay within the
    /// scatter kernel's local-size assumptions.
    pub num_blocks_per_workgroup: u32,
}

impl Default for RendererOptions {
    fn default() -> RendererOptions {
        RendererOptions {
            srgb: false,
            force_fallback_sort: false,
            mode: RenderMode::AlphaBlend,
            eye_count: 1,
            width: 0,
            height: 0,
            taa: false,
            num_blocks_per_workgroup: DEFAULT_NUM_BLOCKS_PER_WORKGROUP,
        }
    }
}

impl RendererOptions {
    /// Reads the tuning knobs from a configuration source, falling back to
    /// the defaults for absent keys.
    pub fn from_config(cfg: &Config) -> RendererOptions {
        let mut options = RendererOptions::default();
        options.num_blocks_per_workgroup = cfg
            .get::<u32>("splat.num_blocks_per_workgroup")
            .unwrap_or(DEFAULT_NUM_BLOCKS_PER_WORKGROUP);
        options.force_fallback_sort = cfg
            .get::<bool>("splat.force_fallback_sort")
            .unwrap_or(false);
        options
    }
}

/// Mode-specific pipeline state. The sort buffers only exist in the
/// alpha-blending variant, the temporal chain only in the stochastic one.
enum ModePipeline {
    AlphaBlend(SortPipeline),
    Stochastic { taa: Option<TemporalPipeline> },
}

pub struct SplatRenderer {
    gl: Rc<Gl>,
    splat_prog: Program,
    geometry: SplatGeometry,
    pipeline: ModePipeline,
    num_gaussians: usize,
    eye_count: usize,
    active_eye: usize,
    present_fbo: GLuint,
}

impl SplatRenderer {
    pub fn new(
        core: &GlCore,
        cloud: &dyn GaussianCloud,
        options: &RendererOptions,
    ) -> Result<SplatRenderer> {
        check_gl_error(core.gl(), "renderer init: begin");
        assert!(options.eye_count >= 1, "at least one eye is required");

        let gl = core.gl().clone();
        let num_gaussians = cloud.num_gaussians();
        let use_multi_radix_sort = core.has_shader_subgroup() && !options.force_fallback_sort;

        let mut splat_prog = Program::new(&gl);
        if options.srgb || cloud.has_full_sh() {
            let mut defines = String::new();
            if options.srgb {
                defines.push_str("#define FRAMEBUFFER_SRGB\n");
            }
            if cloud.has_full_sh() {
                defines.push_str("#define FULL_SH\n");
            }
            splat_prog.add_macro("DEFINES", &defines);
        }

        match options.mode {
            RenderMode::AlphaBlend => splat_prog.load_vert_geom_frag(
                "shader/splat_vert.glsl",
                "shader/splat_geom.glsl",
                "shader/splat_frag.glsl",
            )?,
            RenderMode::Stochastic => splat_prog.load_vert_geom_frag(
                "shader/splat_vert.glsl",
                "shader/splat_geom.glsl",
                "shader/splat_frag_ST.glsl",
            )?,
            RenderMode::StochasticPopfree => splat_prog.load_vert_geom_frag(
                "shader/splat_vert_ST_popfree.glsl",
                "shader/splat_geom_ST_popfree.glsl",
                "shader/splat_frag_ST.glsl",
            )?,
        }

        let geometry = build_splat_geometry(&gl, cloud, &splat_prog);

        let pipeline = match options.mode {
            RenderMode::AlphaBlend => {
                let mut pos_vec = Vec::with_capacity(num_gaussians);
                cloud.for_each_pos_with_alpha(&mut |pos| {
                    pos_vec.push(glm::vec4(pos[0], pos[1], pos[2], 1.0));
                });
                ModePipeline::AlphaBlend(SortPipeline::new(
                    &gl,
                    &pos_vec,
                    use_multi_radix_sort,
                    options.num_blocks_per_workgroup,
                )?)
            }
            RenderMode::Stochastic | RenderMode::StochasticPopfree => ModePipeline::Stochastic {
                taa: if options.taa {
                    debug_assert!(
                        core.limits().max_color_attachments >= 2
                            && core.limits().max_draw_buffers >= 2,
                        "temporal accumulation needs two color attachments"
                    );
                    Some(TemporalPipeline::new(
                        &gl,
                        options.eye_count,
                        options.width,
                        options.height,
                    )?)
                } else {
                    None
                },
            },
        };

        check_gl_error(&gl, "renderer init: end");
        Ok(SplatRenderer {
            gl,
            splat_prog,
            geometry,
            pipeline,
            num_gaussians,
            eye_count: options.eye_count,
            active_eye: 0,
            present_fbo: 0,
        })
    }

    /// Depth-sorts the splats back-to-front for the given camera. Outside
    /// the alpha-blending mode this is a no-op.
    pub fn sort(&mut self, camera_mat: &glm::Mat4, proj_mat: &glm::Mat4, near_far: &glm::Vec2) {
        if let ModePipeline::AlphaBlend(sort) = &mut self.pipeline {
            sort.sort(camera_mat, proj_mat, near_far, &self.geometry.index_buffer);
        }
    }

    /// Draws the cloud for the given camera. In alpha-blending mode the draw
    /// goes into whatever framebuffer is currently bound; the stochastic
    /// modes render into the active eye's scene target and, with temporal
    /// accumulation enabled, finish by presenting into the present FBO.
    ///
    /// `viewport` is `(x, y, width, height)`.
    pub fn render(
        &mut self,
        camera_mat: &glm::Mat4,
        proj_mat: &glm::Mat4,
        viewport: &glm::Vec4,
        near_far: &glm::Vec2,
    ) {
        if self.num_gaussians == 0 {
            return;
        }
        check_gl_error(&self.gl, "render: begin");

        unsafe {
            self.gl.Viewport(
                viewport.x as GLint,
                viewport.y as GLint,
                viewport.z as GLint,
                viewport.w as GLint,
            );
        }

        let view_mat = glm::inverse(camera_mat);
        let eye = glm::vec3(camera_mat[(0, 3)], camera_mat[(1, 3)], camera_mat[(2, 3)]);
        // shader-side depth linearization multiplier; projMat[3][2] in
        // column-major terms
        let multiplier = (near_far.x - near_far.y) * proj_mat[(2, 3)];

        self.splat_prog.bind();
        self.splat_prog.set_uniform("viewMat", view_mat);
        self.splat_prog.set_uniform("projMat", *proj_mat);
        self.splat_prog
            .set_uniform("projParams", glm::vec3(viewport.z, viewport.w, multiplier));
        self.splat_prog.set_uniform("eye", eye);

        self.geometry.vao.bind();
        match &mut self.pipeline {
            ModePipeline::AlphaBlend(sort) => unsafe {
                self.gl.DrawElements(
                    gl::POINTS,
                    sort.sort_count as GLsizei,
                    gl::UNSIGNED_INT,
                    ptr::null(),
                );
            },
            ModePipeline::Stochastic { taa } => {
                // the seed only has to change frame-to-frame, nothing more
                self.splat_prog
                    .set_uniform("u_randomSeed", rand::random::<u32>());

                if let Some(taa) = taa {
                    taa.begin_eye_frame(self.active_eye, &(proj_mat * view_mat));
                    taa.scene_fbo(self.active_eye).bind();
                    unsafe {
                        self.gl
                            .Viewport(0, 0, viewport.z as GLint, viewport.w as GLint);
                        self.gl.Enable(gl::DEPTH_TEST);
                        self.gl.DepthFunc(gl::LESS);
                        self.gl.Clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);
                    }
                }
                unsafe {
                    self.gl.DrawElements(
                        gl::POINTS,
                        self.num_gaussians as GLsizei,
                        gl::UNSIGNED_INT,
                        ptr::null(),
                    );
                }
            }
        }
        self.geometry.vao.unbind();
        check_gl_error(&self.gl, "render: draw");

        if let ModePipeline::Stochastic { taa: Some(taa) } = &mut self.pipeline {
            taa.accumulate_and_present(self.active_eye, self.present_fbo, viewport);
        }
    }

    /// Selects the eye subsequent calls operate on.
    pub fn set_active_eye(&mut self, eye: usize) {
        assert!(eye < self.eye_count, "eye index out of range");
        self.active_eye = eye;
    }

    /// Framebuffer that receives the final composited image.
    pub fn set_present_fbo(&mut self, fbo: GLuint) {
        self.present_fbo = fbo;
    }

    /// Number of splats that survived culling in the last sort; the drawn
    /// element-buffer prefix has this length.
    pub fn sort_count(&self) -> u32 {
        match &self.pipeline {
            ModePipeline::AlphaBlend(sort) => sort.sort_count,
            ModePipeline::Stochastic { .. } => 0,
        }
    }

    /// Clears the active eye's temporal history without reallocating.
    pub fn reset_temporal_history(&mut self) {
        if let ModePipeline::Stochastic { taa: Some(taa) } = &mut self.pipeline {
            taa.reset_history(self.active_eye);
        }
    }

    /// Reallocates the active eye's temporal targets for a new resolution.
    pub fn resize_temporal_targets(&mut self, new_width: i32, new_height: i32) {
        if let ModePipeline::Stochastic { taa: Some(taa) } = &mut self.pipeline {
            taa.resize(self.active_eye, new_width, new_height);
        }
    }
}

// TESTS -------------------------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = RendererOptions::default();
        assert_eq!(options.mode, RenderMode::AlphaBlend);
        assert_eq!(options.eye_count, 1);
        assert_eq!(options.num_blocks_per_workgroup, 1024);
        assert!(!options.force_fallback_sort);
        assert!(!options.taa);
    }

    #[test]
    fn test_options_from_config() {
        let cfg = Config::builder()
            .set_override("splat.num_blocks_per_workgroup", 512)
            .unwrap()
            .set_override("splat.force_fallback_sort", true)
            .unwrap()
            .build()
            .unwrap();
        let options = RendererOptions::from_config(&cfg);
        assert_eq!(options.num_blocks_per_workgroup, 512);
        assert!(options.force_fallback_sort);
        // untouched knobs keep their defaults
        assert_eq!(options.mode, RenderMode::AlphaBlend);
    }

    #[test]
    fn test_options_from_empty_config() {
        let cfg = Config::builder().build().unwrap();
        let options = RendererOptions::from_config(&cfg);
        assert_eq!(
            options.num_blocks_per_workgroup,
            DEFAULT_NUM_BLOCKS_PER_WORKGROUP
        );
        assert!(!options.force_fallback_sort);
    }
}
