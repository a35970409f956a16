//! Council MCP Server
//!
//! This crate provides an MCP server that lets a host process drive several
//! language-model backends through one protocol, and delegate sandboxed
//! code-generation work to a local CLI runner. It offers:
//!
//! - One-shot prompts against OpenAI, Anthropic, Gemini or OpenAI-compatible
//!   endpoints behind a single gateway contract
//! - Multi-model brainstorms: proposals, debate rounds and a synthesis
//! - A runner bridge confined to an allow-list of filesystem roots, with a
//!   hard timeout per call
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Host (MCP client)                         │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             │ JSON-RPC, Content-Length framed stdio
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   embeddenator-council-mcp                       │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐   │
//! │  │ Transport  │ │ Dispatcher │ │ Tool       │ │ Orchestr-  │   │
//! │  │            │ │            │ │ Registry   │ │ ator       │   │
//! │  └────────────┘ └────────────┘ └────────────┘ └────────────┘   │
//! └───────────────────────────┬─────────────────────────────────────┘
//!                             │
//!                 ┌───────────┴───────────┐
//!                 ▼                       ▼
//!         ┌───────────────┐       ┌───────────────┐
//!         │ Model gateway │       │ Runner bridge │
//!         │ (HTTPS)       │       │ (subprocess)  │
//!         │ OpenAI, Gemini│       │ claude -p     │
//!         │ Anthropic, …  │       │               │
//!         └───────────────┘       └───────────────┘
//! ```
//!
//! # MCP Tools
//!
//! | Tool | Description |
//! |------|-------------|
//! | `model.one_shot` | Send one prompt to one model |
//! | `model.brainstorm` | Proposal, debate and synthesis across models |
//! | `claude.one_shot` | Run a prompt through the local runner |
//! | `claude.review_diff` | Review a unified diff |
//! | `claude.generate_patch` | Produce a unified-diff patch |

pub mod bridge;
pub mod config;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use bridge::{AllowedRoots, ExecutionBridge};
pub use config::{ServerConfig, Settings, Surface};
pub use error::{Error, Result};
pub use gateway::{HttpGateway, ModelGateway, ModelSpec};
pub use orchestrator::AgentOrchestrator;
pub use protocol::{McpRequest, McpResponse};
pub use server::AgentMcpServer;
