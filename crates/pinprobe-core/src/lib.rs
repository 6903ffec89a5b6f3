mod manifest;
mod status;
mod version;

pub use manifest::{
    canonical_name, detect_manifest, parse_pipfile, parse_requirements_txt, read_manifest,
    rewrite_pipfile, rewrite_requirements_txt, ManifestKind, Requirements,
};
pub use status::{
    CandidateState, PackageUpdateStatus, Recommendation, StatusLedger, UpdateResult,
    UNKNOWN_VERSION,
};
pub use version::{versions_match, PreReleaseKind, ReleaseVersion};
