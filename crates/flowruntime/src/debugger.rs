//! Debugger state machine, breakpoints and activation history.
//!
//! The debugger never drives scheduling itself. The engine asks it whether to
//! stop before an activation and feeds it activation records; commands from the
//! debugger UI arrive as a line protocol inside `debuggerMessage` bytes and
//! events go back the same way inside `debuggerEvent`.

use chrono::{DateTime, Utc};
use flowcore::{ComponentIndex, ConnectionLine, FlowIndex, FlowStateId, ProtocolError, Value};
use serde::Serialize;
use std::collections::HashMap;

pub type RecordId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DebuggerState {
    Running,
    Paused,
    Stepping,
}

impl DebuggerState {
    fn code(self) -> u8 {
        match self {
            DebuggerState::Running => 0,
            DebuggerState::Paused => 1,
            DebuggerState::Stepping => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Fatal,
    Error,
    Warning,
    Scpi,
    Info,
    Debug,
}

impl LogLevel {
    fn code(self) -> u8 {
        match self {
            LogLevel::Fatal => 0,
            LogLevel::Error => 1,
            LogLevel::Warning => 2,
            LogLevel::Scpi => 3,
            LogLevel::Info => 4,
            LogLevel::Debug => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Breakpoint {
    pub flow: FlowIndex,
    pub component: ComponentIndex,
}

/// One activation in the history log
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub flow_state: FlowStateId,
    pub flow_index: FlowIndex,
    pub component: ComponentIndex,
    pub connection: Option<ConnectionLine>,
    pub is_error: bool,
    pub message: Option<String>,
    /// Activation that caused this one
    pub parent: Option<RecordId>,
    pub children: Vec<RecordId>,
}

/// Commands sent by the debugger UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerCommand {
    Resume,
    Pause,
    SingleStep,
    AddBreakpoint(Breakpoint),
    RemoveBreakpoint(Breakpoint),
    EnableBreakpoint(Breakpoint),
    DisableBreakpoint(Breakpoint),
    ClearHistory,
}

impl DebuggerCommand {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
        let code: u8 = fields[0]
            .parse()
            .map_err(|_| ProtocolError::Debugger(format!("bad command tag '{}'", fields[0])))?;

        let breakpoint = || -> Result<Breakpoint, ProtocolError> {
            if fields.len() < 3 {
                return Err(ProtocolError::Debugger(format!(
                    "command {} needs flow and component",
                    code
                )));
            }
            let number = |s: &str| {
                s.parse::<u32>()
                    .map_err(|_| ProtocolError::Debugger(format!("bad index '{}'", s)))
            };
            Ok(Breakpoint {
                flow: number(fields[1])?,
                component: number(fields[2])?,
            })
        };

        match code {
            0 => Ok(DebuggerCommand::Resume),
            1 => Ok(DebuggerCommand::Pause),
            2 => Ok(DebuggerCommand::SingleStep),
            3 => Ok(DebuggerCommand::AddBreakpoint(breakpoint()?)),
            4 => Ok(DebuggerCommand::RemoveBreakpoint(breakpoint()?)),
            5 => Ok(DebuggerCommand::EnableBreakpoint(breakpoint()?)),
            6 => Ok(DebuggerCommand::DisableBreakpoint(breakpoint()?)),
            7 => Ok(DebuggerCommand::ClearHistory),
            other => Err(ProtocolError::Debugger(format!("unknown command {}", other))),
        }
    }

    /// Parse every line of a `debuggerMessage` payload
    pub fn parse_all(bytes: &[u8]) -> Vec<Result<Self, ProtocolError>> {
        match std::str::from_utf8(bytes) {
            Ok(text) => text
                .split('\n')
                .filter(|line| !line.trim().is_empty())
                .map(Self::parse)
                .collect(),
            Err(e) => vec![Err(ProtocolError::Debugger(e.to_string()))],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let line = match self {
            DebuggerCommand::Resume => "0".to_string(),
            DebuggerCommand::Pause => "1".to_string(),
            DebuggerCommand::SingleStep => "2".to_string(),
            DebuggerCommand::AddBreakpoint(b) => format!("3\t{}\t{}", b.flow, b.component),
            DebuggerCommand::RemoveBreakpoint(b) => format!("4\t{}\t{}", b.flow, b.component),
            DebuggerCommand::EnableBreakpoint(b) => format!("5\t{}\t{}", b.flow, b.component),
            DebuggerCommand::DisableBreakpoint(b) => format!("6\t{}\t{}", b.flow, b.component),
            DebuggerCommand::ClearHistory => "7".to_string(),
        };
        format!("{}\n", line).into_bytes()
    }
}

/// Events sent to the debugger UI
#[derive(Debug, Clone, PartialEq)]
pub enum DebuggerEvent {
    StateChanged(DebuggerState),
    AddToQueue {
        flow_state: FlowStateId,
        connection: ConnectionLine,
    },
    RemoveFromQueue,
    GlobalVariableInit {
        name: String,
        value: Value,
    },
    LocalVariableInit {
        flow_state: FlowStateId,
        name: String,
        value: Value,
    },
    ComponentInputInit {
        flow_state: FlowStateId,
        component: ComponentIndex,
        input: u32,
        value: Value,
    },
    ValueChanged {
        name: String,
        value: Value,
    },
    FlowStateCreated {
        flow_state: FlowStateId,
        flow_index: FlowIndex,
        parent: Option<FlowStateId>,
        parent_component: Option<ComponentIndex>,
    },
    FlowStateDestroyed {
        flow_state: FlowStateId,
    },
    FlowStateError {
        flow_state: FlowStateId,
        component: ComponentIndex,
        message: String,
    },
    Log {
        level: LogLevel,
        flow_state: FlowStateId,
        component: ComponentIndex,
        message: String,
    },
}

fn text(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn optional(index: Option<u32>) -> String {
    index.map(|i| i.to_string()).unwrap_or_else(|| "-1".to_string())
}

impl DebuggerEvent {
    /// One tab-separated line, terminated by `\n`
    pub fn encode(&self) -> String {
        let line = match self {
            DebuggerEvent::StateChanged(state) => format!("0\t{}", state.code()),
            DebuggerEvent::AddToQueue {
                flow_state,
                connection,
            } => format!(
                "1\t{}\t{}\t{}\t{}\t{}",
                flow_state, connection.source, connection.output, connection.target, connection.input
            ),
            DebuggerEvent::RemoveFromQueue => "2".to_string(),
            DebuggerEvent::GlobalVariableInit { name, value } => {
                format!("3\t{}\t{}", text(name), value.to_display_json())
            }
            DebuggerEvent::LocalVariableInit {
                flow_state,
                name,
                value,
            } => format!("4\t{}\t{}\t{}", flow_state, text(name), value.to_display_json()),
            DebuggerEvent::ComponentInputInit {
                flow_state,
                component,
                input,
                value,
            } => format!(
                "5\t{}\t{}\t{}\t{}",
                flow_state,
                component,
                input,
                value.to_display_json()
            ),
            DebuggerEvent::ValueChanged { name, value } => {
                format!("6\t{}\t{}", text(name), value.to_display_json())
            }
            DebuggerEvent::FlowStateCreated {
                flow_state,
                flow_index,
                parent,
                parent_component,
            } => format!(
                "7\t{}\t{}\t{}\t{}",
                flow_state,
                flow_index,
                optional(*parent),
                optional(*parent_component)
            ),
            DebuggerEvent::FlowStateDestroyed { flow_state } => format!("8\t{}", flow_state),
            DebuggerEvent::FlowStateError {
                flow_state,
                component,
                message,
            } => format!("9\t{}\t{}\t{}", flow_state, component, text(message)),
            DebuggerEvent::Log {
                level,
                flow_state,
                component,
                message,
            } => format!(
                "10\t{}\t{}\t{}\t{}",
                level.code(),
                flow_state,
                component,
                text(message)
            ),
        };
        format!("{}\n", line)
    }
}

#[derive(Debug)]
pub struct Debugger {
    state: DebuggerState,
    breakpoints: HashMap<Breakpoint, bool>,
    /// Component paused on by a breakpoint; it runs once without re-hitting it
    skip_once: Option<(FlowStateId, ComponentIndex)>,
    history: Vec<HistoryRecord>,
    positions: HashMap<RecordId, usize>,
    next_record: RecordId,
    events: Vec<DebuggerEvent>,
    emit_events: bool,
}

impl Debugger {
    pub fn new(emit_events: bool) -> Self {
        Self {
            state: DebuggerState::Running,
            breakpoints: HashMap::new(),
            skip_once: None,
            history: Vec::new(),
            positions: HashMap::new(),
            next_record: 0,
            events: Vec::new(),
            emit_events,
        }
    }

    pub fn state(&self) -> DebuggerState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state != DebuggerState::Running
    }

    fn set_state(&mut self, state: DebuggerState) {
        if self.state != state {
            tracing::debug!("Debugger state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(DebuggerEvent::StateChanged(state));
        }
    }

    pub fn pause(&mut self) -> bool {
        if self.state == DebuggerState::Running {
            self.set_state(DebuggerState::Paused);
            return true;
        }
        false
    }

    pub fn resume(&mut self) -> bool {
        if self.state == DebuggerState::Paused {
            self.set_state(DebuggerState::Running);
            return true;
        }
        false
    }

    /// paused -> stepping. Returns false when not paused.
    pub fn begin_step(&mut self) -> bool {
        if self.state == DebuggerState::Paused {
            self.set_state(DebuggerState::Stepping);
            return true;
        }
        false
    }

    /// stepping -> paused
    pub fn end_step(&mut self) {
        if self.state == DebuggerState::Stepping {
            self.set_state(DebuggerState::Paused);
        }
        self.skip_once = None;
    }

    /// Apply a UI command. Returns true when a single step was requested.
    pub fn apply(&mut self, command: DebuggerCommand) -> bool {
        match command {
            DebuggerCommand::Resume => {
                self.resume();
            }
            DebuggerCommand::Pause => {
                self.pause();
            }
            DebuggerCommand::SingleStep => return true,
            DebuggerCommand::AddBreakpoint(b) => self.add_breakpoint(b),
            DebuggerCommand::RemoveBreakpoint(b) => self.remove_breakpoint(b),
            DebuggerCommand::EnableBreakpoint(b) => self.set_breakpoint_enabled(b, true),
            DebuggerCommand::DisableBreakpoint(b) => self.set_breakpoint_enabled(b, false),
            DebuggerCommand::ClearHistory => self.clear_history(),
        }
        false
    }

    pub fn add_breakpoint(&mut self, breakpoint: Breakpoint) {
        self.breakpoints.insert(breakpoint, true);
    }

    pub fn remove_breakpoint(&mut self, breakpoint: Breakpoint) {
        self.breakpoints.remove(&breakpoint);
    }

    pub fn set_breakpoint_enabled(&mut self, breakpoint: Breakpoint, enabled: bool) {
        if let Some(flag) = self.breakpoints.get_mut(&breakpoint) {
            *flag = enabled;
        }
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = (&Breakpoint, &bool)> {
        self.breakpoints.iter()
    }

    /// Check before running an activation. Pauses on an enabled breakpoint.
    pub fn should_break(
        &mut self,
        flow_state: FlowStateId,
        flow: FlowIndex,
        component: ComponentIndex,
    ) -> bool {
        if self.state != DebuggerState::Running {
            return false;
        }
        if self.skip_once == Some((flow_state, component)) {
            self.skip_once = None;
            return false;
        }
        if self.breakpoints.get(&Breakpoint { flow, component }) == Some(&true) {
            self.skip_once = Some((flow_state, component));
            self.pause();
            return true;
        }
        false
    }

    pub fn record_activation(
        &mut self,
        flow_state: FlowStateId,
        flow_index: FlowIndex,
        component: ComponentIndex,
        connection: Option<ConnectionLine>,
        parent: Option<RecordId>,
    ) -> RecordId {
        let id = self.next_record;
        self.next_record += 1;

        if let Some(position) = parent.and_then(|p| self.positions.get(&p)).copied() {
            self.history[position].children.push(id);
        }

        self.positions.insert(id, self.history.len());
        self.history.push(HistoryRecord {
            id,
            timestamp: Utc::now(),
            flow_state,
            flow_index,
            component,
            connection,
            is_error: false,
            message: None,
            parent,
            children: Vec::new(),
        });
        id
    }

    pub fn mark_error(&mut self, record: RecordId, message: &str) {
        if let Some(position) = self.positions.get(&record).copied() {
            let entry = &mut self.history[position];
            entry.is_error = true;
            entry.message = Some(message.to_string());
        }
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    pub fn record(&self, id: RecordId) -> Option<&HistoryRecord> {
        self.positions.get(&id).map(|position| &self.history[*position])
    }

    /// Records with no parent still present in the log
    pub fn history_roots(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.history
            .iter()
            .filter(|r| r.parent.map_or(true, |p| !self.positions.contains_key(&p)))
    }

    pub fn clear_history(&mut self) {
        tracing::debug!("Clearing {} history records", self.history.len());
        self.history.clear();
        self.positions.clear();
    }

    pub fn emit(&mut self, event: DebuggerEvent) {
        if self.emit_events {
            self.events.push(event);
        }
    }

    pub fn take_events(&mut self) -> Vec<DebuggerEvent> {
        std::mem::take(&mut self.events)
    }
}
