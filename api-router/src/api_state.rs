use std::{sync::Arc, time::Duration};

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{
        config::AppConfig,
        llm::{ChatCompletion, OpenAiChat},
        monitor::SystemMonitor,
        rag_runtime::RagRuntime,
        tasks::TaskSupervisor,
        worker_pool::WorkerPool,
    },
};
use ingestion_pipeline::{
    analysis::PaperAnalyzer, Chunker, DefaultPaperServices, Indexer, PaperPipeline,
};
use retrieval_pipeline::{
    translation::LlmTranslator, web_search::DuckDuckGoSearch, AnswerSettings, AssemblyTuning,
    ChatOrchestrator, ContextAssembler, PaperCatalog, PassageAssistant, Retriever,
};
use tracing::info;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub runtime: Arc<RagRuntime>,
    pub monitor: Arc<SystemMonitor>,
    pub papers: Arc<PaperPipeline>,
    pub assembler: Arc<ContextAssembler>,
    pub chat: Arc<ChatOrchestrator>,
    pub passages: Arc<PassageAssistant>,
}

impl ApiState {
    /// Connects to the metadata store, warms the RAG runtime and wires every
    /// service.
    pub async fn new(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let surreal_db_client = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                config.surrealdb_username.as_deref(),
                config.surrealdb_password.as_deref(),
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        surreal_db_client.ensure_initialized().await?;

        let runtime = Arc::new(RagRuntime::from_config(config));
        runtime.warm_up().await?;
        info!(rag = ?runtime.status(), "RAG runtime warmed up");

        let app_state = Self::from_parts(
            surreal_db_client,
            config.clone(),
            runtime,
            TaskSupervisor::with_logging(),
        )?;

        Ok(app_state)
    }

    /// Builds the services over already opened resources.
    pub fn from_parts(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        runtime: Arc<RagRuntime>,
        supervisor: TaskSupervisor,
    ) -> Result<Self, AppError> {
        let monitor = Arc::new(SystemMonitor::new(Duration::from_secs(
            config.thinking_timeout_secs,
        )));

        let chat_llm: Option<Arc<dyn ChatCompletion>> = if config.has_llm_credential() {
            Some(Arc::new(OpenAiChat::from_config(&config, &config.chat_model)?))
        } else {
            info!("no language model credential configured; running in mock mode");
            None
        };

        let services = DefaultPaperServices::new(
            Arc::clone(&db),
            WorkerPool::new(config.worker_pool_size)?,
            Chunker::default(),
            Indexer::new(Arc::clone(&runtime), config.index_batch_size),
            PaperAnalyzer::new(chat_llm.clone()),
            supervisor,
            Arc::clone(&monitor),
            config.uploads_path(),
        );
        let papers = Arc::new(PaperPipeline::new(Arc::new(services)));

        let mut assembler = ContextAssembler::new(
            Retriever::new(Arc::clone(&runtime), config.retrieval_k),
            Arc::clone(&db) as Arc<dyn PaperCatalog>,
            Arc::clone(&monitor),
            AssemblyTuning::from_app_config(&config),
        );
        if config.has_llm_credential() && config.translation_enabled {
            let model = config
                .translation_model
                .as_deref()
                .unwrap_or(&config.chat_model);
            let translator = LlmTranslator::new(Arc::new(OpenAiChat::from_config(&config, model)?));
            assembler = assembler.with_translator(Arc::new(translator));
        }
        if config.web_search_enabled {
            assembler = assembler.with_web_search(Arc::new(DuckDuckGoSearch::new()?));
        }
        let assembler = Arc::new(assembler);

        let passages = Arc::new(PassageAssistant::from_app_config(
            chat_llm.clone(),
            Arc::clone(&monitor),
            &config,
        ));

        let chat = Arc::new(ChatOrchestrator::new(
            Arc::clone(&assembler),
            chat_llm,
            Arc::clone(&monitor),
            AnswerSettings::from_app_config(&config),
        ));

        Ok(Self {
            db,
            config,
            runtime,
            monitor,
            papers,
            assembler,
            chat,
            passages,
        })
    }
}
