use crate::diagnostic_logging::LoggingConfig;
use lifecycle::LifeCycle;
use std::future::Future;

pub struct StartConfig<'a> {
    pub logging: LoggingConfig<'a>,
}

impl<'a> StartConfig<'a> {
    pub async fn run<INIT, FINI>(
        self,
        init_future: INIT,
        shutdown_future: FINI,
    ) -> anyhow::Result<()>
    where
        INIT: Future<Output = anyhow::Result<()>> + Send + 'static,
        FINI: Future<Output = ()> + Send + 'static,
    {
        self.logging.init()?;

        let mut life_cycle = LifeCycle::new();

        let init_handle = tokio::spawn(async move {
            let mut error = None;
            if let Err(err) = init_future.await {
                let err = format!("{err:#}");
                tracing::error!("problem initializing: {err}");
                LifeCycle::request_shutdown().await;
                error.replace(err);
            }
            tracing::info!("initialization complete");
            error
        });

        life_cycle.wait_for_shutdown().await;

        // after waiting for those to idle out, shut down logging
        shutdown_future.await;

        tracing::info!("Shutdown completed OK!");

        if let Some(error) = init_handle.await? {
            anyhow::bail!("Initialization raised an error: {error}");
        }
        Ok(())
    }
}
