//! Project wiring
//!
//! A project picks one gateway, its system prompt and the tools the model
//! sees, and assembles a [`Dispatcher`] from the loaded [`Config`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::error::{Result, SkychatError};
use crate::gateway::weather::API_KEY_ENV as OPENWEATHER_KEY_ENV;
use crate::gateway::{AviationGateway, DatabaseGateway, Gateway, PostgresExecutor, PostgresSettings, WeatherGateway};
use crate::llm::anthropic::API_KEY_ENV as ANTHROPIC_KEY_ENV;
use crate::llm::{AnthropicClient, AnthropicConfig, LlmClient, LlmError};

const PLANE_PROMPT: &str = "You are a flight tracking assistant. When the user asks about aircraft \
over a place, work out a latitude/longitude bounding box that covers it and call get_aircraft. \
Summarize what you find, including how many aircraft are in the area.";

const WEATHER_PROMPT: &str = "You are a weather assistant. Call get_weather for the city the user \
asks about and describe the current conditions. If the city cannot be found, say so plainly.";

const POSTGRES_PROMPT: &str = "You are a data analyst with read-only access to a PostgreSQL \
database. Answer questions by writing a single SELECT statement and calling run_sql_query. \
Never attempt to modify data. Explain the results in plain language.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Project {
    #[default]
    Plane,
    Weather,
    Postgres,
}

impl Project {
    pub fn as_str(&self) -> &'static str {
        match self {
            Project::Plane => "plane",
            Project::Weather => "weather",
            Project::Postgres => "postgres",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Project::Plane => PLANE_PROMPT,
            Project::Weather => WEATHER_PROMPT,
            Project::Postgres => POSTGRES_PROMPT,
        }
    }

    /// Build this project's gateway. The postgres gateway connects and
    /// introspects the schema here.
    pub async fn gateway(&self, config: &Config) -> Result<Arc<dyn Gateway>> {
        match self {
            Project::Plane => {
                let gateway = AviationGateway::new(&config.aviation.base_url, config.aviation.timeout())?;
                Ok(Arc::new(gateway))
            }
            Project::Weather => {
                let api_key = config
                    .weather
                    .api_key
                    .clone()
                    .ok_or_else(|| SkychatError::Config(format!("{} is not set", OPENWEATHER_KEY_ENV)))?;
                let gateway = WeatherGateway::new(
                    &config.weather.base_url,
                    api_key,
                    &config.weather.units,
                    config.weather.timeout(),
                )?;
                Ok(Arc::new(gateway))
            }
            Project::Postgres => {
                let db = &config.database;
                let settings = PostgresSettings {
                    host: db.host.clone(),
                    port: db.port,
                    dbname: db.dbname.clone(),
                    user: db.user.clone(),
                    password: db.password.clone(),
                    pool_size: db.pool_size,
                    timeout: db.timeout(),
                };
                let executor = PostgresExecutor::new(&settings)?;
                let gateway = DatabaseGateway::connect(executor, db.max_rows).await?;
                println!("Connected to database. Schema loaded.");
                println!("Available tables: {}", gateway.schema().table_names().join(", "));
                Ok(Arc::new(gateway))
            }
        }
    }

    pub fn dispatch_config(&self, config: &Config) -> DispatchConfig {
        DispatchConfig::default()
            .with_max_iterations(config.dispatch.max_iterations)
            .with_max_tokens(config.llm.max_tokens)
            .with_system_prompt(self.system_prompt())
    }

    /// Assemble a dispatcher around the given model client
    pub async fn dispatcher<L: LlmClient>(&self, config: &Config, llm: Arc<L>) -> Result<Dispatcher<L>> {
        let gateway = self.gateway(config).await?;
        let dispatcher = Dispatcher::new(llm, self.dispatch_config(config)).with_gateway(gateway)?;
        log::info!(
            "Project {} ready with tools: {}",
            self.as_str(),
            dispatcher.registry().names().join(", ")
        );
        Ok(dispatcher)
    }
}

impl std::fmt::Display for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anthropic client from the `llm` config section
pub fn anthropic_client(config: &Config) -> Result<AnthropicClient> {
    let missing = || LlmError::MissingApiKey {
        env_var: ANTHROPIC_KEY_ENV.to_string(),
    };
    let api_key = config.llm.api_key.clone().ok_or_else(missing)?;
    let client = AnthropicClient::with_api_key(
        api_key,
        AnthropicConfig {
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            timeout: config.llm.timeout(),
            api_url: config.llm.api_url.clone(),
        },
    )?;
    if !client.is_ready() {
        return Err(missing().into());
    }
    Ok(client)
}
