//! Docker engine built on bollard.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    KillContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use futures::StreamExt;
use kestrel_core::backend::{Config, State, Step};
use kestrel_core::multipart::MultipartReader;
use kestrel_core::ports::Engine;
use kestrel_core::{Error, Result};
use tracing::{debug, info, warn};

/// Engine running each step in its own Docker container.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Backend(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self { docker })
    }

    /// Create with an existing Docker client.
    pub fn with_docker(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(update) = progress.next().await {
            update.map_err(|e| Error::Backend(format!("Failed to pull {}: {}", image, e)))?;
        }
        Ok(())
    }

    async fn create(&self, step: &Step) -> std::result::Result<(), DockerError> {
        let env = step
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let config = ContainerConfig {
            image: Some(step.image.clone()),
            env: Some(env),
            entrypoint: (!step.entrypoint.is_empty()).then(|| step.entrypoint.clone()),
            cmd: (!step.command.is_empty()).then(|| step.command.clone()),
            working_dir: (!step.working_dir.is_empty()).then(|| step.working_dir.clone()),
            host_config: Some(HostConfig {
                binds: Some(step.volumes.clone()),
                privileged: Some(step.privileged),
                network_mode: step.network_mode.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: step.name.as_str(),
            platform: None,
        };
        self.docker.create_container(Some(options), config).await?;
        Ok(())
    }
}

fn backend_error(action: &str, target: &str, e: DockerError) -> Error {
    Error::Backend(format!("Failed to {} {}: {}", action, target, e))
}

#[async_trait]
impl Engine for DockerEngine {
    async fn setup(&self, config: &Config) -> Result<()> {
        for volume in &config.volumes {
            let options = CreateVolumeOptions {
                name: volume.name.as_str(),
                driver: volume.driver.as_str(),
                ..Default::default()
            };
            self.docker
                .create_volume(options)
                .await
                .map_err(|e| backend_error("create volume", &volume.name, e))?;
        }
        for network in &config.networks {
            let options = CreateNetworkOptions {
                name: network.name.as_str(),
                driver: network.driver.as_str(),
                ..Default::default()
            };
            self.docker
                .create_network(options)
                .await
                .map_err(|e| backend_error("create network", &network.name, e))?;
        }
        debug!(
            volumes = config.volumes.len(),
            networks = config.networks.len(),
            "Pipeline resources created"
        );
        Ok(())
    }

    async fn exec(&self, step: &Step) -> Result<()> {
        if step.pull {
            self.pull(&step.image).await?;
        }

        match self.create(step).await {
            Ok(()) => {}
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                self.pull(&step.image).await?;
                self.create(step)
                    .await
                    .map_err(|e| backend_error("create container", &step.name, e))?;
            }
            Err(e) => return Err(backend_error("create container", &step.name, e)),
        }

        if step.network_mode.is_none() {
            for conn in &step.networks {
                let options = ConnectNetworkOptions {
                    container: step.name.as_str(),
                    endpoint_config: EndpointSettings {
                        aliases: Some(conn.aliases.clone()),
                        ..Default::default()
                    },
                };
                self.docker
                    .connect_network(&conn.name, options)
                    .await
                    .map_err(|e| backend_error("connect network", &conn.name, e))?;
            }
        }

        self.docker
            .start_container(&step.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| backend_error("start container", &step.name, e))?;
        debug!(container = %step.name, "Container started");
        Ok(())
    }

    async fn kill(&self, step: &Step) -> Result<()> {
        self.docker
            .kill_container(&step.name, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| backend_error("kill container", &step.name, e))
    }

    async fn wait(&self, step: &Step) -> Result<State> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut waiting = self.docker.wait_container(&step.name, Some(options));
        match waiting.next().await {
            Some(Ok(_)) | None => {}
            // Non-zero exits surface as wait errors; inspect below has the code.
            Some(Err(DockerError::DockerContainerWaitError { .. })) => {}
            Some(Err(e)) => return Err(backend_error("wait for container", &step.name, e)),
        }

        let inspected = self
            .docker
            .inspect_container(&step.name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| backend_error("inspect container", &step.name, e))?;
        let state = inspected.state.unwrap_or_default();
        Ok(State {
            exit_code: state.exit_code.unwrap_or_default(),
            exited: true,
            oom_killed: state.oom_killed.unwrap_or_default(),
        })
    }

    async fn tail(&self, step: &Step) -> Result<MultipartReader> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let body = self
            .docker
            .logs(&step.name, Some(options))
            .map(|output| {
                output
                    .map(|o| o.into_bytes().to_vec())
                    .map_err(std::io::Error::other)
            });
        Ok(MultipartReader::single(body))
    }

    async fn destroy(&self, config: &Config) -> Result<()> {
        for step in config.steps() {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = self.docker.remove_container(&step.name, Some(options)).await {
                warn!(container = %step.name, error = %e, "Failed to remove container");
            }
        }
        for volume in &config.volumes {
            let options = RemoveVolumeOptions { force: true };
            if let Err(e) = self.docker.remove_volume(&volume.name, Some(options)).await {
                warn!(volume = %volume.name, error = %e, "Failed to remove volume");
            }
        }
        for network in &config.networks {
            if let Err(e) = self.docker.remove_network(&network.name).await {
                warn!(network = %network.name, error = %e, "Failed to remove network");
            }
        }
        Ok(())
    }
}
