//! Contract with the external gaussian-cloud loader.
//!
//! The core never parses point-cloud files; it consumes an immutable block
//! of interleaved vertex records plus named byte offsets for each attribute
//! within a record. Implementations live with the embedder.

/// Data type of a cloud attribute. The splat vertex layout only supports
/// float attributes; anything else is a programming error on the loader
/// side.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttributeType {
    Float,
}

/// Location of one named attribute inside an interleaved vertex record.
#[derive(Copy, Clone, Debug)]
pub struct BinaryAttribute {
    pub ty: AttributeType,
    pub offset: usize,
}

/// The named attributes of a splat record, in vertex-layout order.
///
/// SH bands 1..3 only exist when the cloud carries full spherical-harmonic
/// color; band 0 alone is the minimal form.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SplatAttribute {
    PosWithAlpha,
    RSh0,
    GSh0,
    BSh0,
    RSh1,
    RSh2,
    RSh3,
    GSh1,
    GSh2,
    GSh3,
    BSh1,
    BSh2,
    BSh3,
    Cov3Col0,
    Cov3Col1,
    Cov3Col2,
}

impl SplatAttribute {
    /// Name of the matching input of the splat vertex shader.
    pub fn shader_name(self) -> &'static str {
        match self {
            SplatAttribute::PosWithAlpha => "position",
            SplatAttribute::RSh0 => "r_sh0",
            SplatAttribute::GSh0 => "g_sh0",
            SplatAttribute::BSh0 => "b_sh0",
            SplatAttribute::RSh1 => "r_sh1",
            SplatAttribute::RSh2 => "r_sh2",
            SplatAttribute::RSh3 => "r_sh3",
            SplatAttribute::GSh1 => "g_sh1",
            SplatAttribute::GSh2 => "g_sh2",
            SplatAttribute::GSh3 => "g_sh3",
            SplatAttribute::BSh1 => "b_sh1",
            SplatAttribute::BSh2 => "b_sh2",
            SplatAttribute::BSh3 => "b_sh3",
            SplatAttribute::Cov3Col0 => "cov3_col0",
            SplatAttribute::Cov3Col1 => "cov3_col1",
            SplatAttribute::Cov3Col2 => "cov3_col2",
        }
    }

    /// Number of float components the attribute spans.
    pub fn components(self) -> i32 {
        match self {
            SplatAttribute::Cov3Col0 | SplatAttribute::Cov3Col1 | SplatAttribute::Cov3Col2 => 3,
            _ => 4,
        }
    }

    /// True for the SH band 1..3 attributes that only full-SH clouds carry.
    pub fn requires_full_sh(self) -> bool {
        match self {
            SplatAttribute::PosWithAlpha
            | SplatAttribute::RSh0
            | SplatAttribute::GSh0
            | SplatAttribute::BSh0
            | SplatAttribute::Cov3Col0
            | SplatAttribute::Cov3Col1
            | SplatAttribute::Cov3Col2 => false,
            _ => true,
        }
    }

    /// Every attribute in vertex-layout order.
    pub fn all() -> &'static [SplatAttribute] {
        use self::SplatAttribute::*;
        &[
            PosWithAlpha,
            RSh0,
            GSh0,
            BSh0,
            RSh1,
            RSh2,
            RSh3,
            GSh1,
            GSh2,
            GSh3,
            BSh1,
            BSh2,
            BSh3,
            Cov3Col0,
            Cov3Col1,
            Cov3Col2,
        ]
    }
}

/// Read-only view of a loaded gaussian cloud.
pub trait GaussianCloud {
    fn num_gaussians(&self) -> usize;

    /// The interleaved vertex records, uploaded to the GPU verbatim.
    fn raw_data(&self) -> &[u8];

    fn total_size(&self) -> usize {
        self.raw_data().len()
    }

    /// Byte stride of one vertex record.
    fn stride(&self) -> usize;

    /// Whether the cloud carries 3 SH bands per channel rather than band 0
    /// only.
    fn has_full_sh(&self) -> bool;

    /// Locates `attr` within a record. Attributes gated on `has_full_sh`
    /// are only queried when the cloud reports full SH.
    fn attribute(&self, attr: SplatAttribute) -> BinaryAttribute;

    /// Visits the xyz position of every splat in record order. Used once at
    /// initialization to build the depth-sort position buffer.
    fn for_each_pos_with_alpha(&self, visitor: &mut dyn FnMut(&[f32; 3]));
}

// TESTS -------------------------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_order_and_arity() {
        let all = SplatAttribute::all();
        assert_eq!(all.len(), 16);
        assert_eq!(all[0], SplatAttribute::PosWithAlpha);
        assert_eq!(all[0].components(), 4);
        assert_eq!(SplatAttribute::Cov3Col2.components(), 3);
        assert_eq!(all.iter().filter(|a| a.requires_full_sh()).count(), 9);
        assert_eq!(SplatAttribute::PosWithAlpha.shader_name(), "position");
        assert_eq!(SplatAttribute::BSh3.shader_name(), "b_sh3");
    }
}
