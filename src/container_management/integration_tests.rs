#[cfg(test)]
mod integration_tests {
    use crate::configuration::LaunchConfig;
    use crate::container_management::{ContainerController, ContainerStatus, StartRequest};
    use crate::engine::{DockerEngine, Engine};
    use std::sync::Arc;
    use tempfile::TempDir;

    // Small image that stays up long enough to be inspected
    const IMAGE: &str = "busybox";
    const TAG: &str = "latest";

    fn test_config(name: &str) -> LaunchConfig {
        LaunchConfig {
            image_name: IMAGE.to_string(),
            server_name: format!("labs-launcher-test-{}", name),
            // notebook flags land in $0.. of `sh -c`, which ignores them
            container_cmd: "sh -c sleep${IFS}30".to_string(),
            port: 18888,
            aux_port: 18889,
            ..LaunchConfig::default()
        }
    }

    async fn docker_with_image() -> Option<Arc<DockerEngine>> {
        let engine = DockerEngine::connect().ok()?;
        engine.version().await.ok()?;
        if !engine.image_exists(&format!("{}:{}", IMAGE, TAG)).await.ok()? {
            return None;
        }
        Some(Arc::new(engine))
    }

    #[tokio::test]
    #[ignore = "requires a docker daemon with the busybox image"]
    async fn test_start_stop_roundtrip() {
        let engine = docker_with_image()
            .await
            .expect("docker daemon with busybox:latest is required");
        let config = test_config("roundtrip");
        let controller = ContainerController::new(engine, &config);
        let dir = TempDir::new().unwrap();

        let request = StartRequest::new(dir.path(), "token", config.port);
        let status = controller.start(TAG, &request).await.expect("start should succeed");
        assert_eq!(status, ContainerStatus::Running);
        assert_eq!(controller.status().await, ContainerStatus::Running);
        assert_eq!(
            controller.server_address().await.as_deref(),
            Some("http://localhost:18888?token=token")
        );

        let stopped = controller.stop().await.expect("stop should succeed");
        assert_eq!(stopped, ContainerStatus::Inactive);
        assert_eq!(controller.status().await, ContainerStatus::Inactive);
    }

    #[tokio::test]
    #[ignore = "requires a docker daemon"]
    async fn test_status_of_unknown_container_is_inactive() {
        let Ok(engine) = DockerEngine::connect() else {
            return;
        };
        if engine.version().await.is_err() {
            return;
        }
        let config = test_config("absent");
        let controller = ContainerController::new(Arc::new(engine), &config);

        assert!(controller.engine_available().await);
        assert_eq!(controller.status().await, ContainerStatus::Inactive);
        assert_eq!(
            controller.stop().await.expect("stop should succeed"),
            ContainerStatus::Inactive
        );
    }
}
