use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::{RegistryAuth, RegistryCredentials};
use crate::error::BackendError;

pub const AWS_ECR: &str = "aws/ecr";

static ECR_IMAGE: OnceLock<Regex> = OnceLock::new();

fn ecr_image() -> &'static Regex {
	ECR_IMAGE.get_or_init(|| {
		Regex::new(r"^([a-zA-Z0-9][a-zA-Z0-9_-]*)\.dkr\.ecr\.([a-zA-Z0-9][a-zA-Z0-9_-]*)\.amazonaws\.com(\.cn)?/.*")
			.expect("static regex pattern is valid")
	})
}

/// Parts of an image reference hosted on ECR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcrImage {
	pub account: String,
	pub region: String,
	pub registry: String,
	pub repository: String,
}

impl EcrImage {
	pub fn parse(image: &str) -> Option<Self> {
		let caps = ecr_image().captures(image)?;
		let (registry, rest) = image.split_once('/')?;
		let repository = rest.split(':').next().unwrap_or(rest);
		Some(Self {
			account: caps.get(1)?.as_str().to_string(),
			region: caps.get(2)?.as_str().to_string(),
			registry: registry.to_string(),
			repository: repository.to_string(),
		})
	}
}

/// `aws/ecr` auth provider, driven through the `aws` command line client.
#[derive(Debug, Clone)]
pub struct EcrAuth {
	program: String,
}

impl Default for EcrAuth {
	fn default() -> Self {
		Self::new("aws")
	}
}

impl EcrAuth {
	pub fn new(program: impl Into<String>) -> Self {
		Self {
			program: program.into(),
		}
	}

	async fn aws(&self, args: &[&str]) -> Result<String, BackendError> {
		let output = Command::new(&self.program)
			.args(args)
			.stdin(Stdio::null())
			.output()
			.await
			.map_err(|source| BackendError::Spawn {
				program: self.program.clone(),
				source,
			})?;

		if !output.status.success() {
			return Err(BackendError::Command {
				program: self.program.clone(),
				status: output.status.to_string(),
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}
		Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
	}
}

#[async_trait]
impl RegistryAuth for EcrAuth {
	fn name(&self) -> &str {
		AWS_ECR
	}

	fn handles(&self, image: &str) -> bool {
		ecr_image().is_match(image)
	}

	async fn latest_tag(&self, image: &str) -> Result<Option<String>, BackendError> {
		let Some(ecr) = EcrImage::parse(image) else {
			return Ok(None);
		};

		let tag = self
			.aws(&[
				"ecr",
				"describe-images",
				"--registry-id",
				ecr.account.as_str(),
				"--region",
				ecr.region.as_str(),
				"--repository-name",
				ecr.repository.as_str(),
				"--query",
				"sort_by(imageDetails,&imagePushedAt)[-1].imageTags[0]",
				"--output",
				"text",
			])
			.await?;

		if tag.is_empty() || tag == "None" {
			tracing::debug!("no tags found for {}", image);
			return Ok(None);
		}
		tracing::debug!("identified tag as most recent: {}", tag);
		Ok(Some(tag))
	}

	async fn credentials(&self, image: &str) -> Result<RegistryCredentials, BackendError> {
		let ecr = EcrImage::parse(image).ok_or(BackendError::NoAuthorization)?;
		let password = self
			.aws(&["ecr", "get-login-password", "--region", ecr.region.as_str()])
			.await?;
		if password.is_empty() {
			return Err(BackendError::NoAuthorization);
		}

		Ok(RegistryCredentials {
			username: "AWS".to_string(),
			password,
			server: format!("https://{}", ecr.registry),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_ecr_images() {
		let image = EcrImage::parse("123456789012.dkr.ecr.us-east-1.amazonaws.com/team/files:53226da5").unwrap();
		assert_eq!(image.account, "123456789012");
		assert_eq!(image.region, "us-east-1");
		assert_eq!(image.registry, "123456789012.dkr.ecr.us-east-1.amazonaws.com");
		assert_eq!(image.repository, "team/files");

		let cn = EcrImage::parse("1.dkr.ecr.cn-north-1.amazonaws.com.cn/app").unwrap();
		assert_eq!(cn.region, "cn-north-1");
		assert_eq!(cn.repository, "app");
	}

	#[test]
	fn other_registries_are_not_handled() {
		let auth = EcrAuth::default();
		assert!(!auth.handles("redis"));
		assert!(!auth.handles("ghcr.io/org/app"));
		assert!(auth.handles("1.dkr.ecr.eu-west-1.amazonaws.com/app"));
		assert_eq!(auth.name(), "aws/ecr");
	}
}
