use crate::config::MatchPolicy;
use crate::error::Error;
use crate::storage::ImageStore;
use crate::{Embedding, FaceEncoder};
use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;

/// Ledger label for a face that matched nobody.
pub const UNKNOWN: &str = "Unknown";

/// A registered face: whose it is and where its encoding came from.
#[derive(Debug, Clone)]
pub struct KnownFace {
    pub identity: String,
    pub embedding: Embedding,
    pub source: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Known(String),
    Unknown,
}

impl Recognition {
    pub fn label(&self) -> &str {
        match self {
            Recognition::Known(name) => name,
            Recognition::Unknown => UNKNOWN,
        }
    }
}

impl fmt::Display for Recognition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Encode the first face of every stored reference image.
///
/// Identities and images are visited in name order, which fixes the
/// iteration order [`MatchPolicy::First`] relies on.
pub fn build_known_set<E>(store: &ImageStore, encoder: &mut E) -> Result<Vec<KnownFace>>
where
    E: FaceEncoder + ?Sized,
{
    let mut known = Vec::new();
    for (identity, dir) in store.identities()? {
        for path in store.images(&dir)? {
            let img = image::open(&path).with_context(|| format!("reading {}", path.display()))?;
            let first = encoder
                .encode_faces(&img)
                .with_context(|| format!("encoding {}", path.display()))?
                .into_iter()
                .next()
                .ok_or_else(|| Error::NoFaceDetected {
                    identity: identity.clone(),
                    path: path.clone(),
                })?;
            log::debug!("encoded {} from {}", identity, path.display());
            known.push(KnownFace {
                identity: identity.clone(),
                embedding: first.embedding,
                source: path,
            });
        }
    }
    log::info!("Loaded {} known face(s)", known.len());
    Ok(known)
}

/// Index and distance of the closest known face, if any.
pub fn nearest(known: &[KnownFace], probe: &Embedding) -> Option<(usize, f32)> {
    known
        .iter()
        .map(|k| k.embedding.distance(probe))
        .enumerate()
        .fold(None, |acc, (i, d)| match acc {
            Some((_, best)) if best <= d => acc,
            _ => Some((i, d)),
        })
}

/// Decide who `probe` is. A known face matches when its distance to the
/// probe is at most `tolerance`.
pub fn match_face(
    known: &[KnownFace],
    probe: &Embedding,
    tolerance: f32,
    policy: MatchPolicy,
) -> Recognition {
    let hit = match policy {
        MatchPolicy::First => known
            .iter()
            .position(|k| k.embedding.distance(probe) <= tolerance),
        MatchPolicy::Nearest => nearest(known, probe)
            .filter(|&(_, d)| d <= tolerance)
            .map(|(i, _)| i),
    };
    match hit {
        Some(i) => Recognition::Known(known[i].identity.clone()),
        None => Recognition::Unknown,
    }
}
