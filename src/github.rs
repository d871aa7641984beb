use async_trait::async_trait;
use octocrab::models::Repository;
use octocrab::Octocrab;
use tracing::{debug, info, warn};

use crate::config::{CloneProtocol, GitHubCredentials};
use crate::discovery::{Provider, ProviderError, ProviderNamespace, RepositoryDescriptor};

/// GitHub integration listing the authenticated user's repositories
pub struct GitHubProvider {
    client: Octocrab,
    email: String,
    clone_protocol: CloneProtocol,
}

impl GitHubProvider {
    /// Create a GitHub provider authenticated with a personal access token
    ///
    /// `api_base_url` overrides `https://api.github.com` (GitHub Enterprise, tests).
    pub fn new(
        credentials: GitHubCredentials,
        clone_protocol: CloneProtocol,
        api_base_url: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let mut builder = Octocrab::builder().personal_token(credentials.token);

        if let Some(base) = api_base_url {
            builder = builder.base_uri(base).map_err(|e| unavailable(e.to_string()))?;
        }

        let client = builder
            .build()
            .map_err(|e| unavailable(format!("failed to create GitHub client: {}", e)))?;

        Ok(Self {
            client,
            email: credentials.email,
            clone_protocol,
        })
    }

    /// Convert an octocrab repository into a descriptor
    fn to_descriptor(&self, repo: &Repository) -> Option<RepositoryDescriptor> {
        let full_name = match &repo.full_name {
            Some(full_name) => full_name.clone(),
            None => {
                let owner = repo.owner.as_ref()?.login.clone();
                format!("{}/{}", owner, repo.name)
            }
        };

        let ssh_url = repo.ssh_url.clone();
        let https_url = repo.clone_url.as_ref().map(|u| u.to_string());

        let clone_url = match self.clone_protocol {
            CloneProtocol::Ssh => ssh_url.or(https_url),
            CloneProtocol::Https => https_url.or(ssh_url),
        }?;

        Some(RepositoryDescriptor::new(
            ProviderNamespace::GitHub,
            full_name,
            clone_url,
        ))
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    fn namespace(&self) -> ProviderNamespace {
        ProviderNamespace::GitHub
    }

    async fn list_repositories(&self) -> Result<Vec<RepositoryDescriptor>, ProviderError> {
        debug!("Fetching GitHub repositories for: {}", self.email);

        let mut descriptors = Vec::new();
        let mut page = 1u8;

        loop {
            let page_repos = self
                .client
                .current()
                .list_repos_for_authenticated_user()
                .per_page(100)
                .page(page)
                .send()
                .await
                .map_err(classify_error)?;

            let items = page_repos.items;
            if items.is_empty() {
                break;
            }

            for repo in &items {
                match self.to_descriptor(repo) {
                    Some(descriptor) => descriptors.push(descriptor),
                    None => warn!("Skipping GitHub repository without a clone URL: {}", repo.name),
                }
            }

            // GitHub API pagination limit for u8
            if page == u8::MAX {
                warn!("Reached maximum pagination limit (255 pages)");
                break;
            }
            page += 1;
        }

        info!("Found {} GitHub repositories", descriptors.len());
        Ok(descriptors)
    }
}

fn unavailable(message: String) -> ProviderError {
    ProviderError::Unavailable {
        provider: ProviderNamespace::GitHub,
        message,
    }
}

/// Map octocrab failures onto the provider error taxonomy
fn classify_error(error: octocrab::Error) -> ProviderError {
    if let octocrab::Error::GitHub { source, .. } = &error {
        let status = source.status_code.as_u16();
        if status == 401 || status == 403 {
            return ProviderError::Authentication {
                provider: ProviderNamespace::GitHub,
                message: source.message.clone(),
            };
        }
    }

    unavailable(error.to_string())
}
