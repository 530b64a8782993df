//! Visual geometry verification for hand-drawn answers on graph paper.
//!
//! The pipeline straightens a skewed page, binarizes it, suppresses the
//! printed grid using the known spacing, traces closed contours, classifies
//! them, converts them to grid units and fits the expected shape with a
//! similarity transform.

pub mod config;
pub mod contour;
pub mod deskew;
pub mod error;
pub mod fit;
pub mod preprocess;
pub mod score;
pub mod shape;
pub mod verifier;

pub use config::VerifierConfig;
pub use deskew::{deskew, estimate_skew, Deskewed};
pub use error::{Result, VisionError};
pub use fit::{fit_outline, SimilarityFit};
pub use score::{graded_geometric_confidence, Dimension, DimensionCheck};
pub use shape::{
    DetectedShape, ExpectedVisualAnswer, GeometricAccuracy, GridPoint, ShapeType, Tolerance,
};
pub use verifier::{score_shapes, GeometryVerifier, VisualVerification, NO_SHAPE_FEEDBACK};
