use keel_container::{ContainerError, LogStream, RunSpec};
use keel_core::{
    BUILD_CREATED, BUILD_PREFIX, Build, BuildCreateOptions, BuildUpdateOptions, ID_SUFFIX_LEN,
    generate_id, sortable_time,
};
use tracing::{debug, info};

use super::{LABEL_APP, LABEL_RACK, LABEL_TYPE, LocalProvider, build_key, builds_key, validate_name};
use crate::error::{ProviderError, ProviderResult};

/// Build workers drive the host's container engine directly.
const DOCKER_SOCKET_MOUNT: &str = "/var/run/docker.sock:/var/run/docker.sock";

impl LocalProvider {
    /// Launch a build worker and record the build as `created`.
    ///
    /// Nothing is written and nothing is launched unless the app exists.
    pub(super) async fn create_build(
        &self,
        app: &str,
        url: &str,
        opts: BuildCreateOptions,
    ) -> ProviderResult<Build> {
        self.require_app(app)?;
        if url.trim().is_empty() {
            return Err(ProviderError::Validation("build url is required".to_string()));
        }

        let id = generate_id(BUILD_PREFIX, ID_SUFFIX_LEN);
        let spec = self.build_spec(app, &id, url, &opts);
        let raw = self.runtime.run(&spec).await?;
        let build = self
            .track_container(&raw, |process| -> ProviderResult<Build> {
                let build = Build {
                    id: id.clone(),
                    app: app.to_string(),
                    process,
                    manifest: opts.manifest,
                    release: String::new(),
                    status: BUILD_CREATED.to_string(),
                    started: sortable_time(),
                };
                self.store.store_record(&build_key(app, &id), &build)?;
                Ok(build)
            })
            .await?;
        info!(%app, build = %id, process = %build.process, "build created");
        Ok(build)
    }

    fn build_spec(&self, app: &str, id: &str, url: &str, opts: &BuildCreateOptions) -> RunSpec {
        let mut spec = RunSpec::new(&self.config.image)
            .command("build")
            .arg("-id")
            .arg(id)
            .arg("-url")
            .arg(url)
            .env("BUILD_APP", app)
            .env("RACK_URL", &self.config.rack_url)
            .mount(DOCKER_SOCKET_MOUNT)
            .label(LABEL_RACK, &self.config.name)
            .label(LABEL_APP, app)
            .label(LABEL_TYPE, "build");
        if !opts.manifest.is_empty() {
            spec = spec.arg("-manifest").arg(&opts.manifest);
        }
        spec
    }

    pub(super) fn get_build(&self, app: &str, id: &str) -> ProviderResult<Build> {
        self.require_app(app)?;
        validate_name("build", id)?;
        self.load_record(&build_key(app, id), "build", id)
    }

    /// Newest first.
    pub(super) fn list_builds(&self, app: &str) -> ProviderResult<Vec<Build>> {
        self.require_app(app)?;
        let mut builds = Vec::new();
        for id in self.store.list(&builds_key(app))? {
            match self.load_record::<Build>(&build_key(app, &id), "build", &id) {
                Ok(build) => builds.push(build),
                Err(ProviderError::NotFound(_)) => {
                    debug!(%app, build = %id, "skipping build without record")
                }
                Err(e) => return Err(e),
            }
        }
        builds.sort_by(|a, b| b.started.cmp(&a.started));
        Ok(builds)
    }

    pub(super) async fn build_log_stream(&self, app: &str, id: &str) -> ProviderResult<LogStream> {
        let build = self.get_build(app, id)?;
        match self.runtime.logs(&build.process).await {
            Ok(stream) => Ok(stream),
            Err(ContainerError::NotFound(_)) => {
                Err(ProviderError::not_found("build process", &build.process))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite only the fields `opts` sets.
    pub(super) fn update_build(
        &self,
        app: &str,
        id: &str,
        opts: BuildUpdateOptions,
    ) -> ProviderResult<Build> {
        let mut build = self.get_build(app, id)?;
        if !opts.manifest.is_empty() {
            build.manifest = opts.manifest;
        }
        if !opts.release.is_empty() {
            build.release = opts.release;
        }
        if !opts.status.is_empty() {
            build.status = opts.status;
        }
        self.store.store_record(&build_key(app, id), &build)?;
        debug!(%app, build = %id, status = %build.status, "build updated");
        Ok(build)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{harness, harness_with};
    use super::*;
    use crate::provider::Provider;
    use keel_container::fake::FakeRuntime;
    use tokio::io::AsyncReadExt;

    const SOURCE: &str = "https://example.com/src.tgz";

    #[tokio::test]
    async fn create_launches_worker_and_records_created() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();

        let build = h
            .provider
            .build_create("web", SOURCE, BuildCreateOptions::default())
            .await
            .unwrap();

        assert!(build.id.starts_with('B'));
        assert_eq!(build.id.len(), 11);
        assert_eq!(build.status, "created");
        assert_eq!(build.process.len(), 10);

        let runs = h.runtime.runs();
        assert_eq!(runs.len(), 1);
        let spec = &runs[0];
        assert_eq!(spec.image, "keel/keel");
        assert_eq!(spec.command.as_deref(), Some("build"));
        assert_eq!(spec.args, vec!["-id", build.id.as_str(), "-url", SOURCE]);
        assert_eq!(spec.env["BUILD_APP"], "web");
        assert_eq!(spec.env["RACK_URL"], "https://rack:3000");
        assert_eq!(spec.mounts, vec![DOCKER_SOCKET_MOUNT]);
        assert_eq!(spec.labels["keel.rack"], "keel");
        assert_eq!(spec.labels["keel.app"], "web");

        assert_eq!(h.provider.build_get("web", &build.id).await.unwrap(), build);
    }

    #[tokio::test]
    async fn manifest_is_passed_to_worker() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();
        let opts = BuildCreateOptions {
            manifest: "keel.yml".to_string(),
        };
        let build = h.provider.build_create("web", SOURCE, opts).await.unwrap();

        assert_eq!(build.manifest, "keel.yml");
        assert_eq!(h.runtime.runs()[0].args[4..], ["-manifest", "keel.yml"]);
    }

    #[tokio::test]
    async fn missing_app_writes_nothing() {
        let h = harness();

        let err = h
            .provider
            .build_create("ghost", SOURCE, BuildCreateOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(h.runtime.runs().is_empty());
        assert!(h.provider.store().list("apps").unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_runtime_id_is_rejected_and_worker_stopped() {
        let h = harness_with(FakeRuntime::new().with_id_len(6));
        h.provider.app_create("web").await.unwrap();

        let err = h
            .provider
            .build_create("web", SOURCE, BuildCreateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProviderError::Runtime(ContainerError::InvalidProcessId { .. })
        ));
        assert_eq!(h.runtime.stops().len(), 1);
        assert!(h.provider.build_list("web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn runtime_failure_surfaces() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();
        h.runtime.fail_runs(true);

        let err = h
            .provider
            .build_create("web", SOURCE, BuildCreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Runtime(_)));
        assert!(h.provider.build_list("web").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_update_touches_only_given_fields() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();
        let build = h
            .provider
            .build_create("web", SOURCE, BuildCreateOptions::default())
            .await
            .unwrap();

        let updated = h
            .provider
            .build_update(
                "web",
                &build.id,
                BuildUpdateOptions {
                    status: "running".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, "running");
        assert_eq!(updated.manifest, build.manifest);
        assert_eq!(updated.release, build.release);
        assert_eq!(updated.process, build.process);
        assert_eq!(updated.started, build.started);

        let finished = h
            .provider
            .build_update(
                "web",
                &build.id,
                BuildUpdateOptions {
                    release: "R0123456789".to_string(),
                    status: "complete".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(finished.release, "R0123456789");
        assert_eq!(finished.status, "complete");
        assert_eq!(h.provider.build_get("web", &build.id).await.unwrap(), finished);
    }

    #[tokio::test]
    async fn status_only_update_keeps_manifest_and_release() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();
        let build = h
            .provider
            .build_create("web", SOURCE, BuildCreateOptions::default())
            .await
            .unwrap();
        let before = h
            .provider
            .build_update(
                "web",
                &build.id,
                BuildUpdateOptions {
                    manifest: "services:\n  web: {}\n".to_string(),
                    release: "R0123456789".to_string(),
                    status: "running".to_string(),
                },
            )
            .await
            .unwrap();

        h.provider
            .build_update(
                "web",
                &build.id,
                BuildUpdateOptions {
                    status: "complete".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let after = h.provider.build_get("web", &build.id).await.unwrap();

        assert_eq!(after.manifest, "services:\n  web: {}\n");
        assert_eq!(after.release, "R0123456789");
        assert_eq!(after.status, "complete");
        let changed = [
            before.id != after.id,
            before.app != after.app,
            before.process != after.process,
            before.manifest != after.manifest,
            before.release != after.release,
            before.status != after.status,
            before.started != after.started,
        ];
        assert_eq!(changed.iter().filter(|c| **c).count(), 1);
    }

    #[tokio::test]
    async fn update_missing_build_is_not_found() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();
        let err = h
            .provider
            .build_update("web", "B0000000000", BuildUpdateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn logs_follow_worker_output() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();
        let build = h
            .provider
            .build_create("web", SOURCE, BuildCreateOptions::default())
            .await
            .unwrap();
        h.runtime.set_logs(&build.process, "building...\ndone\n");

        let mut stream = h.provider.build_logs("web", &build.id).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "building...\ndone\n");
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let h = harness();
        h.provider.app_create("web").await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let build = h
                .provider
                .build_create("web", SOURCE, BuildCreateOptions::default())
                .await
                .unwrap();
            ids.push(build.id);
        }

        ids.reverse();
        let listed: Vec<String> =
            h.provider.build_list("web").await.unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(listed, ids);
    }
}
