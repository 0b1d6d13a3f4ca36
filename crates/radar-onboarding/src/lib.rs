pub mod error;
pub mod package;
pub mod service;

pub use error::OnboardingError;
pub use package::{ComponentKind, EnrollmentPackage, PackageStatus};
pub use service::{DownloadToken, OnboardingService};
