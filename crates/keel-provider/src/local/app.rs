use keel_core::App;
use tracing::{debug, info};

use super::{APPS, LocalProvider, app_key, validate_name};
use crate::error::{ProviderError, ProviderResult};

const APP_RUNNING: &str = "running";

impl LocalProvider {
    pub(super) fn create_app(&self, name: &str) -> ProviderResult<App> {
        validate_name("app", name)?;
        let key = app_key(name);
        if self.store.exists(&key)? {
            return Err(ProviderError::AlreadyExists(format!("app {name}")));
        }

        let app = App {
            name: name.to_string(),
            status: APP_RUNNING.to_string(),
        };
        self.store.store_record(&key, &app)?;
        info!(app = %name, "app created");
        Ok(app)
    }

    pub(super) fn get_app(&self, name: &str) -> ProviderResult<App> {
        validate_name("app", name)?;
        self.load_record(&app_key(name), "app", name)
    }

    /// Remove the app record, everything beneath it and its objects.
    pub(super) async fn delete_app(&self, name: &str) -> ProviderResult<()> {
        self.require_app(name)?;
        let removed = self.store.delete_all(&app_key(name))?;
        self.objects.delete_app(name).await?;
        info!(app = %name, keys = removed, "app deleted");
        Ok(())
    }

    pub(super) fn list_apps(&self) -> ProviderResult<Vec<App>> {
        let mut apps = Vec::new();
        for name in self.store.list(APPS)? {
            match self.load_record::<App>(&app_key(&name), "app", &name) {
                Ok(app) => apps.push(app),
                // A child key without its own record, e.g. left behind by a
                // concurrent delete.
                Err(ProviderError::NotFound(_)) => {
                    debug!(app = %name, "skipping app without record")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(apps)
    }
}
