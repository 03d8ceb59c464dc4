// ghinstall-server/src/server.rs
use ghinstall_core::repo::analyze_repository;
use ghinstall_core::{detect_system_info, CommandRunner, RunOptions, ServerConfig};
use rmcp::{model::*, service::*, Error as McpError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const EXECUTE_CLI_COMMAND: &str = "execute_cli_command";
pub const SETUP_REPO: &str = "setup_repo";
pub const CLASSIFY_ERROR: &str = "classify_error";
pub const DETECT_SYSTEM_INFO: &str = "detect_system_info";
pub const ANALYZE_GITHUB_REPO: &str = "analyze_github_repo";

pub const INSTALLATION_PROMPT: &str = "github_installation_workflow";

type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<CallToolResult, McpError>> + Send + 'a>>;

fn create_schema_object(properties: Vec<(&str, Value)>, required: Vec<&str>) -> Arc<Map<String, Value>> {
    let props_map: Map<String, Value> = properties
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let schema = json!({
        "type": "object",
        "properties": props_map,
        "required": required,
    });
    let map = match schema {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Arc::new(map)
}

fn build_tools() -> BTreeMap<String, Tool> {
    let timeout_property = (
        "timeout_secs",
        json!({ "type": "integer", "minimum": 1, "description": "Optional limit in seconds; the command is killed when it is exceeded." }),
    );
    let tools = vec![
        Tool::new(
            EXECUTE_CLI_COMMAND,
            "Executes a shell command and returns its exit code, output and likely causes of failure.",
            create_schema_object(
                vec![
                    ("command", json!({ "type": "string", "description": "The shell command to execute." })),
                    ("working_directory", json!({ "type": "string", "description": "Optional working directory (defaults to the server's directory)." })),
                    timeout_property.clone(),
                ],
                vec!["command"],
            ),
        ),
        Tool::new(
            SETUP_REPO,
            "Runs setup commands inside a cloned repository. Without current_step every command runs in order; with current_step only that command runs and the next step index is returned.",
            create_schema_object(
                vec![
                    ("local_dir", json!({ "type": "string", "description": "Path of the cloned repository." })),
                    ("setup_commands", json!({ "type": "array", "items": { "type": "string" }, "description": "Commands to execute, in order." })),
                    ("current_step", json!({ "type": "integer", "minimum": 0, "description": "Optional index of the single command to execute." })),
                    timeout_property,
                ],
                vec!["local_dir", "setup_commands"],
            ),
        ),
        Tool::new(
            CLASSIFY_ERROR,
            "Lists likely causes for the error output of a failed command.",
            create_schema_object(
                vec![("error_text", json!({ "type": "string", "description": "Error output to analyze." }))],
                vec!["error_text"],
            ),
        ),
        Tool::new(
            DETECT_SYSTEM_INFO,
            "Reports the operating system, Python version and which package managers are installed.",
            create_schema_object(vec![], vec![]),
        ),
        Tool::new(
            ANALYZE_GITHUB_REPO,
            "Clones a GitHub repository (or refreshes an earlier clone) and returns its layout and installation-related files.",
            create_schema_object(
                vec![
                    ("repo_url", json!({ "type": "string", "description": "URL of the repository." })),
                    ("local_dir", json!({ "type": "string", "description": "Optional directory to clone into." })),
                ],
                vec!["repo_url"],
            ),
        ),
    ];
    tools.into_iter().map(|tool| (tool.name.to_string(), tool)).collect()
}

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, McpError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(McpError::invalid_params(format!("'{}' must be a string", key), None)),
    }
}

fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, McpError> {
    optional_str(args, key)?
        .ok_or_else(|| McpError::invalid_params(format!("Missing required argument: {}", key), None))
}

fn optional_u64(args: &Map<String, Value>, key: &str) -> Result<Option<u64>, McpError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| McpError::invalid_params(format!("'{}' must be a non-negative integer", key), None)),
    }
}

fn required_string_list(args: &Map<String, Value>, key: &str) -> Result<Vec<String>, McpError> {
    let value = args
        .get(key)
        .cloned()
        .ok_or_else(|| McpError::invalid_params(format!("Missing required argument: {}", key), None))?;
    serde_json::from_value(value)
        .map_err(|e| McpError::invalid_params(format!("Invalid format for '{}': {}", key, e), None))
}

fn json_result<T: Serialize>(value: &T, is_error: bool) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("Failed to serialize tool result: {}", e), None))?;
    let raw_content = RawContent::Text(RawTextContent { text });
    let annotated = Annotated { raw: raw_content, annotations: None };
    Ok(CallToolResult { content: vec![annotated], is_error: Some(is_error) })
}

async fn blocking<T, F>(task: F) -> Result<T, McpError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| McpError::internal_error(format!("Worker task failed: {}", e), None))
}

fn installation_prompt_text(repo_url: &str, install_path: &str) -> String {
    format!(
        "I would like to install a GitHub repository. Use the tools of this MCP server to carry out the installation.\n\
         \n\
         Repository: [{repo_url}]\n\
         Install location: [{install_path}]\n\
         \n\
         Work through these steps, separating shell commands with semicolons rather than &&:\n\
         \n\
         1. Call `{DETECT_SYSTEM_INFO}` to learn the operating system, Python version and available package managers.\n\
         2. Call `{ANALYZE_GITHUB_REPO}` with the repository URL and install location to clone it (an earlier clone is reused) and read its layout and key files.\n\
         3. From that analysis, write the list of setup commands this system needs.\n\
         4. Run them with `{SETUP_REPO}`, one step at a time via `current_step`, checking each result before moving on.\n\
         5. When a command fails, read its `causes`, or call `{CLASSIFY_ERROR}` on the error output, and adjust the remaining commands.\n\
         \n\
         Show every command you execute together with its result, and explain the important details in plain language."
    )
}

#[derive(Debug, Clone)]
pub struct InstallServer {
    peer: Arc<Mutex<Option<Peer<RoleServer>>>>,
    tools: Arc<BTreeMap<String, Tool>>,
    runner: CommandRunner,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
}

impl InstallServer {
    pub fn new(config: ServerConfig, shutdown: CancellationToken) -> Self {
        let runner = CommandRunner::new(Arc::new(config.rule_table()));
        Self {
            peer: Arc::new(Mutex::new(None)),
            tools: Arc::new(build_tools()),
            runner,
            config: Arc::new(config),
            shutdown,
        }
    }

    /// Per-call timeout wins over the configured default. Runs are also killed when the
    /// server shuts down.
    fn run_options(&self, working_directory: Option<PathBuf>, args: &Map<String, Value>) -> Result<RunOptions, McpError> {
        let timeout = match optional_u64(args, "timeout_secs")? {
            Some(0) => return Err(McpError::invalid_params("'timeout_secs' must be greater than zero", None)),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self.config.default_timeout(),
        };
        Ok(RunOptions {
            working_directory,
            timeout,
            cancel: Some(self.shutdown.child_token()),
        })
    }

    async fn handle_execute_command(&self, args: Map<String, Value>) -> Result<CallToolResult, McpError> {
        let command = required_str(&args, "command")?.to_string();
        let working_directory = optional_str(&args, "working_directory")?.map(PathBuf::from);
        let options = self.run_options(working_directory, &args)?;

        let runner = self.runner.clone();
        let result = blocking(move || runner.run(&command, &options)).await?;
        json_result(&result, !result.success())
    }

    async fn handle_setup_repo(&self, args: Map<String, Value>) -> Result<CallToolResult, McpError> {
        let local_dir = PathBuf::from(required_str(&args, "local_dir")?);
        let commands = required_string_list(&args, "setup_commands")?;
        let current_step = optional_u64(&args, "current_step")?
            .map(usize::try_from)
            .transpose()
            .map_err(|_| McpError::invalid_params("'current_step' is out of range", None))?;
        let options = self.run_options(Some(local_dir), &args)?;

        let runner = self.runner.clone();
        match current_step {
            Some(step) => {
                let outcome = blocking(move || runner.run_setup_step(&commands[..], step, &options)).await?;
                let failed = match &outcome {
                    ghinstall_core::SetupStep::Executed { result, .. } => !result.success(),
                    ghinstall_core::SetupStep::Exhausted { .. } => false,
                };
                json_result(&outcome, failed)
            }
            None => {
                let run = blocking(move || runner.run_setup(&commands[..], &options)).await?;
                json_result(&run, !run.all_successful())
            }
        }
    }

    fn handle_classify_error(&self, args: Map<String, Value>) -> Result<CallToolResult, McpError> {
        let error_text = required_str(&args, "error_text")?;
        let causes = self.runner.rules().classify(error_text);
        json_result(&json!({ "causes": causes }), false)
    }

    async fn handle_detect_system_info(&self) -> Result<CallToolResult, McpError> {
        let runner = self.runner.clone();
        let info = blocking(move || detect_system_info(&runner)).await?;
        json_result(&info, false)
    }

    async fn handle_analyze_repo(&self, args: Map<String, Value>) -> Result<CallToolResult, McpError> {
        let repo_url = required_str(&args, "repo_url")?.to_string();
        let local_dir = optional_str(&args, "local_dir")?.map(PathBuf::from);
        let clone_root = self.config.repo.clone_root.clone();
        let tree_depth = self.config.repo.tree_depth;

        let outcome = blocking(move || {
            analyze_repository(&repo_url, local_dir.as_deref(), clone_root.as_deref(), tree_depth)
        })
        .await?;
        match outcome {
            Ok(analysis) => {
                info!(path = %analysis.repo_path.display(), "Repository analyzed");
                json_result(&analysis, false)
            }
            Err(e) => {
                warn!(error = %e, "Repository analysis failed");
                json_result(&json!({ "error": format!("Failed to analyze repository: {}", e) }), true)
            }
        }
    }

    fn handle_tool_call(&self, params: CallToolRequestParam) -> ToolFuture<'_> {
        debug!(tool = %params.name, "Tool call received");
        let args = params.arguments.unwrap_or_default();
        match &*params.name {
            EXECUTE_CLI_COMMAND => Box::pin(self.handle_execute_command(args)),
            SETUP_REPO => Box::pin(self.handle_setup_repo(args)),
            CLASSIFY_ERROR => {
                let result = self.handle_classify_error(args);
                Box::pin(async move { result })
            }
            DETECT_SYSTEM_INFO => Box::pin(self.handle_detect_system_info()),
            ANALYZE_GITHUB_REPO => Box::pin(self.handle_analyze_repo(args)),
            _ => Box::pin(async { Err(McpError::method_not_found::<CallToolRequestMethod>()) }),
        }
    }

    async fn dispatch(&self, request: ClientRequest) -> Result<ServerResult, McpError> {
        match request {
            ClientRequest::PingRequest(_) => Ok(ServerResult::empty(())),
            ClientRequest::ListToolsRequest(_) => Ok(ServerResult::ListToolsResult(ListToolsResult {
                tools: self.tools.values().cloned().collect(),
                next_cursor: None,
            })),
            ClientRequest::CallToolRequest(Request { params, .. }) => {
                self.handle_tool_call(params).await.map(ServerResult::CallToolResult)
            }
            ClientRequest::ListPromptsRequest(_) => Ok(ServerResult::ListPromptsResult(ListPromptsResult {
                prompts: self.list_prompts(),
                next_cursor: None,
            })),
            ClientRequest::GetPromptRequest(Request { params, .. }) => {
                let arguments = serde_json::to_value(&params.arguments).unwrap_or(Value::Null);
                self.get_prompt(&params.name, arguments).map(ServerResult::GetPromptResult)
            }
            _ => Err(McpError::method_not_found::<InitializeResultMethod>()),
        }
    }

    fn list_prompts(&self) -> Vec<Prompt> {
        vec![Prompt {
            name: INSTALLATION_PROMPT.to_string(),
            description: Some("Step-by-step workflow for installing a GitHub repository with this server's tools.".to_string()),
            arguments: Some(vec![
                PromptArgument {
                    name: "repo_url".to_string(),
                    description: Some("URL of the repository to install.".to_string()),
                    required: Some(true),
                },
                PromptArgument {
                    name: "install_path".to_string(),
                    description: Some("Directory to install into.".to_string()),
                    required: Some(true),
                },
            ]),
        }]
    }

    fn get_prompt(&self, name: &str, arguments: Value) -> Result<GetPromptResult, McpError> {
        if name != INSTALLATION_PROMPT {
            return Err(McpError::invalid_params(format!("Unknown prompt: {}", name), None));
        }
        let args = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let repo_url = required_str(&args, "repo_url")?;
        let install_path = required_str(&args, "install_path")?;
        Ok(GetPromptResult {
            description: Some("GitHub repository installation workflow".to_string()),
            messages: vec![PromptMessage::new_text(
                PromptMessageRole::User,
                installation_prompt_text(repo_url, install_path),
            )],
        })
    }
}

impl Service<RoleServer> for InstallServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: Some(false) }),
                prompts: Some(PromptsCapability { list_changed: Some(false) }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "ghinstall-server".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            instructions: Some(
                "Helps install GitHub repositories: detect the system, clone and analyze the repository, then run and diagnose setup commands.".into(),
            ),
        }
    }

    fn get_peer(&self) -> Option<Peer<RoleServer>> {
        self.peer.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_peer(&mut self, peer: Peer<RoleServer>) {
        if let Ok(mut guard) = self.peer.lock() {
            *guard = Some(peer);
        }
    }

    #[allow(refining_impl_trait)] // Pin<Box<dyn Future>> where the trait uses impl Future
    fn handle_request(
        &self,
        request: ClientRequest,
        _context: RequestContext<RoleServer>,
    ) -> Pin<Box<dyn Future<Output = Result<ServerResult, McpError>> + Send + '_>> {
        let self_clone = self.clone();
        Box::pin(async move { self_clone.dispatch(request).await })
    }

    #[allow(refining_impl_trait)]
    fn handle_notification(
        &self,
        _notification: ClientNotification,
    ) -> Pin<Box<dyn Future<Output = Result<(), McpError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
