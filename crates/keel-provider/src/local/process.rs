use keel_container::{ContainerError, RunSpec, process_handle};
use keel_core::{Process, ProcessListOptions, ProcessRunOptions, sortable_time};
use tracing::{debug, info};

use super::{
    LABEL_APP, LABEL_RACK, LABEL_RELEASE, LABEL_SERVICE, LABEL_TYPE, LocalProvider, process_key,
    validate_name,
};
use crate::error::{ProviderError, ProviderResult};

const PROCESS_RUNNING: &str = "running";

impl LocalProvider {
    pub(super) async fn run_process(
        &self,
        app: &str,
        opts: ProcessRunOptions,
    ) -> ProviderResult<Process> {
        self.require_app(app)?;
        validate_name("service", &opts.service)?;
        if opts.image.is_empty() {
            return Err(ProviderError::Validation("process image is required".to_string()));
        }

        let spec = self.process_spec(app, &opts);
        let raw = self.runtime.run(&spec).await?;
        let process = self
            .track_container(&raw, |id| -> ProviderResult<Process> {
                let process = Process {
                    id,
                    app: app.to_string(),
                    service: opts.service,
                    release: opts.release,
                    status: PROCESS_RUNNING.to_string(),
                    image: opts.image,
                    command: opts.command,
                    started: sortable_time(),
                };
                self.store.store_record(&process_key(app, &process.id), &process)?;
                Ok(process)
            })
            .await?;
        info!(%app, service = %process.service, pid = %process.id, "process started");
        Ok(process)
    }

    fn process_spec(&self, app: &str, opts: &ProcessRunOptions) -> RunSpec {
        let mut spec = RunSpec::new(&opts.image)
            .label(LABEL_RACK, &self.config.name)
            .label(LABEL_APP, app)
            .label(LABEL_SERVICE, &opts.service)
            .label(LABEL_TYPE, "service");
        if !opts.release.is_empty() {
            spec = spec.label(LABEL_RELEASE, &opts.release);
        }
        if let Some((command, args)) = opts.command.split_first() {
            spec = spec.command(command);
            for arg in args {
                spec = spec.arg(arg);
            }
        }
        for (key, value) in &opts.env {
            spec = spec.env(key, value);
        }
        for mount in &opts.mounts {
            spec = spec.mount(mount);
        }
        spec
    }

    /// Running processes of `app`: the runtime decides what is alive, the
    /// store supplies the details.
    pub(super) async fn list_processes(
        &self,
        app: &str,
        opts: ProcessListOptions,
    ) -> ProviderResult<Vec<Process>> {
        self.require_app(app)?;
        let ids = self.runtime.list_by_labels(&self.app_labels(app)).await?;

        let mut processes = Vec::new();
        for raw in ids {
            let pid = process_handle(&raw)?;
            match self.store.load::<Process>(&process_key(app, &pid)) {
                Ok(process) => processes.push(process),
                // Build workers and foreign containers carry the app label
                // but have no process record.
                Err(e) if e.is_not_found() => debug!(%app, %pid, "untracked container"),
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(service) = opts.service.as_deref().filter(|s| !s.is_empty()) {
            processes.retain(|p| p.service == service);
        }
        processes.sort_by_key(|p| p.started);
        Ok(processes)
    }

    pub(super) async fn stop_process(&self, app: &str, pid: &str) -> ProviderResult<()> {
        let key = self.require_process(app, pid)?;
        match self.runtime.stop(pid).await {
            Ok(()) => {}
            // Already gone; only the record is left to clean up.
            Err(ContainerError::NotFound(_)) => debug!(%app, %pid, "process already stopped"),
            Err(e) => return Err(e.into()),
        }
        self.store.delete(&key)?;
        info!(%app, %pid, "process stopped");
        Ok(())
    }
}
