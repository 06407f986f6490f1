use keel_core::{
    ID_SUFFIX_LEN, RELEASE_PREFIX, Release, ReleaseCreateOptions, generate_id, sortable_time,
};
use tracing::{debug, info};

use super::{LocalProvider, build_key, release_key, releases_key, validate_name};
use crate::error::{ProviderError, ProviderResult};

impl LocalProvider {
    /// Record an immutable release. A named build must already exist.
    pub(super) fn create_release(
        &self,
        app: &str,
        opts: ReleaseCreateOptions,
    ) -> ProviderResult<Release> {
        self.require_app(app)?;
        if !opts.build.is_empty() {
            validate_name("build", &opts.build)?;
            if !self.store.exists(&build_key(app, &opts.build))? {
                return Err(ProviderError::not_found("build", &opts.build));
            }
        }

        let release = Release {
            id: generate_id(RELEASE_PREFIX, ID_SUFFIX_LEN),
            app: app.to_string(),
            build: opts.build,
            env: opts.env,
            manifest: opts.manifest,
            created: sortable_time(),
        };
        self.store.store_record(&release_key(app, &release.id), &release)?;
        info!(%app, release = %release.id, build = %release.build, "release created");
        Ok(release)
    }

    pub(super) fn get_release(&self, app: &str, id: &str) -> ProviderResult<Release> {
        self.require_app(app)?;
        validate_name("release", id)?;
        self.load_record(&release_key(app, id), "release", id)
    }

    pub(super) fn list_releases(&self, app: &str) -> ProviderResult<Vec<Release>> {
        self.require_app(app)?;
        let mut releases = Vec::new();
        for id in self.store.list(&releases_key(app))? {
            match self.load_record::<Release>(&release_key(app, &id), "release", &id) {
                Ok(release) => releases.push(release),
                Err(ProviderError::NotFound(_)) => {
                    debug!(%app, release = %id, "skipping release without record")
                }
                Err(e) => return Err(e),
            }
        }
        releases.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(releases)
    }
}
