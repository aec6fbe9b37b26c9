//! Augmentation profiles and the transform-composition engine.
//!
//! A profile name maps to ordered [`TransformOp`] descriptors for each
//! stage. The engine walks a [`Pipeline`], resolves the stochastic wrappers
//! (`RandomApply`, `RandomHorizontalFlip`) and the flip-test view split
//! itself, and hands every concrete operation to an [`ImageBackend`].

use std::str::FromStr;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::domain::{Result, ZslError};

/// ImageNet channel statistics.
pub const NORMALIZE_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const NORMALIZE_STD: [f32; 3] = [0.229, 0.224, 0.225];

const TRAIN_CROP: u32 = 448;
const EVAL_RESIZE: u32 = 480;

/// One step of an augmentation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformOp {
    RandomResizedCrop { size: u32 },
    RandomHorizontalFlip { p: f64 },
    HorizontalFlip,
    RandomRotation { degrees: f32 },
    GaussianBlur { sigma_min: f32, sigma_max: f32 },
    /// Shuffle neighbouring tiles of a `grid x grid` split.
    RandomSwap { grid: u32 },
    Resize { size: u32 },
    CenterCrop { size: u32 },
    ToTensor,
    Normalize { mean: [f32; 3], std: [f32; 3] },
    RandomApply { p: f64, op: Box<TransformOp> },
    /// Split every view into itself plus its mirror image.
    FlipViews,
}

impl TransformOp {
    pub fn random_apply(p: f64, op: TransformOp) -> Self {
        Self::RandomApply { p, op: Box::new(op) }
    }

    pub fn normalize() -> Self {
        Self::Normalize {
            mean: NORMALIZE_MEAN,
            std: NORMALIZE_STD,
        }
    }

    fn blur() -> Self {
        Self::GaussianBlur {
            sigma_min: 0.1,
            sigma_max: 2.0,
        }
    }
}

/// Executes concrete transforms on one image representation.
///
/// The engine never passes `RandomApply`, `RandomHorizontalFlip` or
/// `FlipViews` here; mirroring arrives as `HorizontalFlip`.
pub trait ImageBackend {
    type Image: Clone;

    fn apply(&mut self, op: &TransformOp, image: Self::Image, rng: &mut dyn RngCore) -> Result<Self::Image>;
}

/// An ordered list of transforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub ops: Vec<TransformOp>,
}

impl Pipeline {
    pub fn new(ops: Vec<TransformOp>) -> Self {
        Self { ops }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run the pipeline. Returns one image per view: a single view unless
    /// the pipeline contains `FlipViews`.
    pub fn run<B: ImageBackend>(
        &self,
        backend: &mut B,
        image: B::Image,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<B::Image>> {
        let mut views = vec![image];
        for op in &self.ops {
            if matches!(op, TransformOp::FlipViews) {
                let mut split = Vec::with_capacity(views.len() * 2);
                for view in views {
                    let mirrored = backend.apply(&TransformOp::HorizontalFlip, view.clone(), rng)?;
                    split.push(view);
                    split.push(mirrored);
                }
                views = split;
                continue;
            }
            views = views
                .into_iter()
                .map(|view| apply_op(backend, op, view, rng))
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(views)
    }
}

fn apply_op<B: ImageBackend>(
    backend: &mut B,
    op: &TransformOp,
    image: B::Image,
    rng: &mut dyn RngCore,
) -> Result<B::Image> {
    match op {
        TransformOp::RandomApply { p, op } => {
            if rng.gen_bool(p.clamp(0.0, 1.0)) {
                apply_op(backend, op, image, rng)
            } else {
                Ok(image)
            }
        }
        TransformOp::RandomHorizontalFlip { p } => {
            if rng.gen_bool(p.clamp(0.0, 1.0)) {
                backend.apply(&TransformOp::HorizontalFlip, image, rng)
            } else {
                Ok(image)
            }
        }
        TransformOp::FlipViews => Err(ZslError::InvalidConfig(
            "FlipViews cannot be nested inside RandomApply".to_string(),
        )),
        concrete => backend.apply(concrete, image, rng),
    }
}

/// Named training augmentation profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AugmentationProfile {
    V1,
    V2,
    V3,
    V4,
    V6,
    V7,
}

impl FromStr for AugmentationProfile {
    type Err = ZslError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            "v3" => Ok(Self::V3),
            "v4" => Ok(Self::V4),
            "v6" => Ok(Self::V6),
            "v7" => Ok(Self::V7),
            other => Err(ZslError::InvalidConfig(format!(
                "unknown augmentation profile: {}",
                other
            ))),
        }
    }
}

/// Pipelines for every stage of one experiment. The `*_post` stages run
/// after the image has been loaded and cropped (tensor conversion and
/// normalisation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformPlan {
    pub train: Pipeline,
    pub train_post: Pipeline,
    pub eval: Pipeline,
    pub eval_post: Pipeline,
}

impl TransformPlan {
    pub fn new(profile: AugmentationProfile, flip_test: bool) -> Self {
        let (train, train_post) = train_pipelines(profile);
        let (eval, eval_post) = eval_pipelines(flip_test);
        Self {
            train,
            train_post,
            eval,
            eval_post,
        }
    }

    /// Number of views produced per evaluation example.
    pub fn eval_views(&self) -> usize {
        let splits = self
            .eval
            .ops
            .iter()
            .chain(&self.eval_post.ops)
            .filter(|op| matches!(op, TransformOp::FlipViews))
            .count();
        1 << splits
    }
}

fn train_pipelines(profile: AugmentationProfile) -> (Pipeline, Pipeline) {
    use TransformOp as T;

    let crop_flip = || {
        vec![
            T::RandomResizedCrop { size: TRAIN_CROP },
            T::RandomHorizontalFlip { p: 0.5 },
        ]
    };
    let rotation = || T::random_apply(0.5, T::RandomRotation { degrees: 30.0 });
    let swap = || T::random_apply(0.2, T::RandomSwap { grid: 3 });

    let mut ops = Vec::new();
    match profile {
        AugmentationProfile::V1 => ops.extend(crop_flip()),
        AugmentationProfile::V2 => {
            ops.extend(crop_flip());
            ops.push(T::random_apply(0.5, T::blur()));
        }
        AugmentationProfile::V3 => {
            ops.push(rotation());
            ops.extend(crop_flip());
            ops.push(T::random_apply(0.5, T::blur()));
        }
        AugmentationProfile::V4 => {
            ops.extend(crop_flip());
            ops.push(T::random_apply(0.5, T::blur()));
            ops.push(swap());
        }
        AugmentationProfile::V6 => {
            ops.push(rotation());
            ops.extend(crop_flip());
            ops.push(T::random_apply(0.5, T::blur()));
            ops.push(swap());
        }
        AugmentationProfile::V7 => {
            return (
                Pipeline::new(crop_flip()),
                Pipeline::new(vec![T::ToTensor, T::normalize()]),
            );
        }
    }
    ops.push(T::ToTensor);
    ops.push(T::normalize());
    (Pipeline::new(ops), Pipeline::default())
}

fn eval_pipelines(flip_test: bool) -> (Pipeline, Pipeline) {
    use TransformOp as T;

    if flip_test {
        (
            Pipeline::new(vec![
                T::Resize { size: EVAL_RESIZE },
                T::CenterCrop { size: TRAIN_CROP },
                T::FlipViews,
                T::ToTensor,
                T::normalize(),
            ]),
            Pipeline::default(),
        )
    } else {
        (
            Pipeline::new(vec![
                T::Resize { size: EVAL_RESIZE },
                T::CenterCrop { size: EVAL_RESIZE },
            ]),
            Pipeline::new(vec![T::ToTensor, T::normalize()]),
        )
    }
}
