//! Line-oriented editor for the patch bay.
//!
//! Stands in for the graphical canvas: every command maps onto one patch bay
//! edit, so each accepted line triggers exactly one autosave.

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chainhost_patch::{GraphDocument, NodeId, NodeKind, PatchBay, Position, encode_state};

pub const HELP: &str = "\
commands:
  nodes                      list nodes and wires
  plugins                    list known plugins
  add-input <name>           add a device input node
  add-output <name>          add a device output node
  add <identifier>           add a known plugin
  remove <id>                remove a node and its wires
  move <id> <x> <y>          move a node on the canvas
  connect <from> <to>        wire two nodes (replaces the destination's input)
  disconnect <from> <to>     remove one wire
  disconnect-all <id>        remove every wire touching a node
  state <id>                 print a plugin's state as base64
  bypass <id> on|off         pass audio around a plugin
  save <file.ron>            write the graph to a file
  load <file.ron>            replace the graph from a file
  help                       show this text
  quit                       save plugin states and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nodes,
    Plugins,
    AddInput(String),
    AddOutput(String),
    AddPlugin(String),
    Remove(NodeId),
    Move(NodeId, Position),
    Connect(NodeId, NodeId),
    Disconnect(NodeId, NodeId),
    DisconnectAll(NodeId),
    State(NodeId),
    Bypass(NodeId, bool),
    Save(PathBuf),
    Load(PathBuf),
    Help,
    Quit,
}

fn node_id(word: Option<&str>) -> Result<NodeId> {
    let word = word.context("missing node id")?;
    word.parse()
        .map(NodeId)
        .with_context(|| format!("'{word}' is not a node id"))
}

fn coordinate(word: Option<&str>) -> Result<i32> {
    let word = word.context("missing coordinate")?;
    word.parse()
        .with_context(|| format!("'{word}' is not a coordinate"))
}

fn switch(word: Option<&str>) -> Result<bool> {
    match word.context("missing on/off")? {
        "on" => Ok(true),
        "off" => Ok(false),
        other => bail!("'{other}' is not on or off"),
    }
}

fn rest(line: &str, command: &str) -> Result<String> {
    let text = line.trim()[command.len()..].trim();
    if text.is_empty() {
        bail!("{command} needs an argument");
    }
    Ok(text.to_string())
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            bail!("empty command");
        };

        let parsed = match command {
            "nodes" | "ls" => Self::Nodes,
            "plugins" => Self::Plugins,
            "add-input" => Self::AddInput(rest(line, command)?),
            "add-output" => Self::AddOutput(rest(line, command)?),
            "add" => Self::AddPlugin(rest(line, command)?),
            "remove" | "rm" => Self::Remove(node_id(words.next())?),
            "move" => {
                let id = node_id(words.next())?;
                let x = coordinate(words.next())?;
                let y = coordinate(words.next())?;
                Self::Move(id, Position::new(x, y))
            }
            "connect" => Self::Connect(node_id(words.next())?, node_id(words.next())?),
            "disconnect" => Self::Disconnect(node_id(words.next())?, node_id(words.next())?),
            "disconnect-all" => Self::DisconnectAll(node_id(words.next())?),
            "state" => Self::State(node_id(words.next())?),
            "bypass" => Self::Bypass(node_id(words.next())?, switch(words.next())?),
            "save" => Self::Save(rest(line, command)?.into()),
            "load" => Self::Load(rest(line, command)?.into()),
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command '{other}' (try 'help')"),
        };
        Ok(parsed)
    }
}

/// Whether the console keeps reading after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Apply one command to the patch bay, writing any report to `out`
pub fn execute(bay: &mut PatchBay, command: Command, out: &mut impl Write) -> Result<Flow> {
    match command {
        Command::Nodes => print_nodes(bay, out)?,
        Command::Plugins => {
            for descriptor in bay.known_plugins().types() {
                writeln!(
                    out,
                    "{} [{}] {}",
                    descriptor.name, descriptor.format, descriptor.file_or_identifier
                )?;
            }
        }
        Command::AddInput(name) => {
            let id = bay.add_input(name);
            writeln!(out, "added input {id}")?;
        }
        Command::AddOutput(name) => {
            let id = bay.add_output(name);
            writeln!(out, "added output {id}")?;
        }
        Command::AddPlugin(identifier) => {
            let id = bay.add_known_plugin(&identifier)?;
            writeln!(out, "added plugin {id}")?;
        }
        Command::Remove(id) => {
            if !bay.remove_node(id) {
                bail!("no node {id}");
            }
        }
        Command::Move(id, position) => {
            if !bay.move_node(id, position) {
                bail!("no node {id}");
            }
        }
        Command::Connect(from, to) => bay.connect(from, to)?,
        Command::Disconnect(from, to) => {
            if !bay.disconnect(from, to) {
                bail!("no wire {from} -> {to}");
            }
        }
        Command::DisconnectAll(id) => {
            let removed = bay.disconnect_all(id);
            writeln!(out, "removed {removed} wires")?;
        }
        Command::State(id) => {
            let state = bay.plugin_state(id)?;
            writeln!(out, "{}", encode_state(&state))?;
        }
        Command::Bypass(id, bypassed) => {
            if !bay.set_bypassed(id, bypassed) {
                bail!("no live plugin {id}");
            }
        }
        Command::Save(path) => {
            bay.save()
                .save(&path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            writeln!(out, "saved {}", path.display())?;
        }
        Command::Load(path) => {
            let document = GraphDocument::load(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let report = bay.open_document(&document);
            for (id, reason) in &report.dropped_nodes {
                writeln!(out, "dropped node {id}: {reason}")?;
            }
            for wire in &report.dropped_wires {
                writeln!(out, "dropped wire {wire}")?;
            }
        }
        Command::Help => writeln!(out, "{HELP}")?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn print_nodes(bay: &PatchBay, out: &mut impl Write) -> Result<()> {
    for node in bay.topology().nodes() {
        let detail = match node.kind() {
            NodeKind::Plugin {
                descriptor,
                lifecycle,
            } => format!(" {} {:?}", descriptor.file_or_identifier, lifecycle),
            NodeKind::Input | NodeKind::Output => String::new(),
        };
        writeln!(
            out,
            "{:>4} {:<7} {:<20} ({}, {}){}",
            node.id(),
            node.role(),
            node.name,
            node.position.x,
            node.position.y,
            detail
        )?;
    }
    for wire in bay.topology().wires() {
        writeln!(out, "     {wire}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainhost_audio::builtin::{self, BuiltinProvider, gain::GAIN_IDENTIFIER};
    use chainhost_audio::{AudioConfig, AudioGraph};

    fn bay() -> PatchBay {
        let (mut graph, _processor) = AudioGraph::new(AudioConfig::default());
        graph.install_io_endpoints();
        PatchBay::new(graph, BuiltinProvider)
            .with_known_plugins(builtin::descriptors().into_iter().collect())
    }

    fn run(bay: &mut PatchBay, line: &str) -> Result<String> {
        let mut out = Vec::new();
        execute(bay, line.parse()?, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "add-input Built-in Mic".parse::<Command>().unwrap(),
            Command::AddInput("Built-in Mic".to_string())
        );
        assert_eq!(
            "connect 1 3".parse::<Command>().unwrap(),
            Command::Connect(NodeId(1), NodeId(3))
        );
        assert_eq!(
            "move 2 10 -4".parse::<Command>().unwrap(),
            Command::Move(NodeId(2), Position::new(10, -4))
        );
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Command>().is_err());
        assert!("connect 1".parse::<Command>().is_err());
        assert!("remove one".parse::<Command>().is_err());
        assert!("add-input".parse::<Command>().is_err());
        assert!("frobnicate".parse::<Command>().is_err());
    }

    #[test]
    fn test_build_chain() {
        let mut bay = bay();
        assert_eq!(run(&mut bay, "add-input Mic").unwrap(), "added input 1\n");
        assert_eq!(run(&mut bay, "add-output Speakers").unwrap(), "added output 2\n");
        assert_eq!(
            run(&mut bay, &format!("add {GAIN_IDENTIFIER}")).unwrap(),
            "added plugin 3\n"
        );
        run(&mut bay, "connect 1 3").unwrap();
        run(&mut bay, "connect 3 2").unwrap();

        let listing = run(&mut bay, "nodes").unwrap();
        assert!(listing.contains("1 -> 3"));
        assert!(listing.contains("3 -> 2"));

        assert_eq!(run(&mut bay, "state 3").unwrap(), "AACAPw==\n");

        run(&mut bay, "bypass 3 on").unwrap();
        assert_eq!(bay.is_bypassed(NodeId(3)), Some(true));
        assert!(run(&mut bay, "bypass 1 on").is_err());
        assert!("bypass 3 maybe".parse::<Command>().is_err());
    }

    #[test]
    fn test_rejections_are_errors() {
        let mut bay = bay();
        run(&mut bay, "add-input Mic").unwrap();
        assert!(run(&mut bay, "connect 1 1").is_err());
        assert!(run(&mut bay, "remove 9").is_err());
        assert!(run(&mut bay, "add nope").is_err());
    }

    #[test]
    fn test_save_and_load_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.ron");
        let mut bay = bay();
        run(&mut bay, "add-input Mic").unwrap();
        run(&mut bay, "add-output Out").unwrap();
        run(&mut bay, "connect 1 2").unwrap();
        run(&mut bay, &format!("save {}", path.display())).unwrap();

        run(&mut bay, "disconnect 1 2").unwrap();
        assert!(bay.topology().wires().is_empty());

        run(&mut bay, &format!("load {}", path.display())).unwrap();
        assert_eq!(bay.topology().wires().len(), 1);
    }

    #[test]
    fn test_load_reaches_the_autosave() {
        use std::cell::RefCell;
        use std::rc::Rc;

        use chainhost_patch::{Settings, keys};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.ron");
        let mut bay = bay();
        run(&mut bay, "add-input Mic").unwrap();
        run(&mut bay, "add-output Out").unwrap();
        run(&mut bay, "connect 1 2").unwrap();
        run(&mut bay, &format!("save {}", path.display())).unwrap();
        run(&mut bay, "remove 2").unwrap();

        let settings = Rc::new(RefCell::new(Settings::in_memory()));
        let autosave = Rc::clone(&settings);
        bay.set_on_graph_changed(move |bay| {
            bay.store_in_settings(&mut autosave.borrow_mut()).unwrap();
        });
        bay.store_in_settings(&mut settings.borrow_mut()).unwrap();
        let before = settings.borrow().value(keys::NODE_GRAPH_STATE).cloned();

        run(&mut bay, &format!("load {}", path.display())).unwrap();
        let after = settings.borrow().value(keys::NODE_GRAPH_STATE).cloned();
        assert_ne!(before, after);

        let mut restored = self::bay();
        restored.restore_from_settings(&settings.borrow()).unwrap();
        assert_eq!(restored.topology().len(), 2);
        assert_eq!(restored.topology().wires().len(), 1);
    }

    #[test]
    fn test_quit() {
        let mut bay = bay();
        let mut out = Vec::new();
        assert_eq!(execute(&mut bay, Command::Quit, &mut out).unwrap(), Flow::Quit);
    }
}
