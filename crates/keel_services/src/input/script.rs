// script.rs - text format for input action layers
//
// Line-oriented, `#` starts a comment. One document declares any number of
// layers; a malformed layer logs a warning and is skipped, the following
// layers still parse.
//
//   layer gameplay
//     source key jump = kb.space, pad.a
//     source axis2d look = mouse.pos deadzone 0.1
//     action fire: bool
//       behavior once
//       when pressed jump
//         do activate
//       final
//     action aim: axis2
//       when moved look
//         do activate
//         do set look.x -> .x
//         do set look.y -> .y
//     modifier aim scale 2.0 .xy
//   end

use super::builder::LayerBuilder;
use super::layer::InputActionLayer;
use super::types::{input_binding_id, Behavior, ConditionId, DataKind, SourceKind, StepId};

/// Parse every layer in `source`, returning the ones that parsed cleanly in
/// document order.
pub fn parse_layers(source: &str) -> Vec<InputActionLayer> {
    let mut layers = Vec::new();
    let mut state: Option<ParseState> = None;

    for (index, raw) in source.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let keyword = tokens[0];

        if keyword == "layer" {
            if let Some(previous) = state.take() {
                previous.finish(&mut layers);
            }
            match tokens.get(1) {
                Some(name) => state = Some(ParseState::new(name)),
                None => tracing::warn!(line = index + 1, "layer without a name; skipping"),
            }
            continue;
        }

        if keyword == "end" {
            match state.take() {
                Some(current) => current.finish(&mut layers),
                None => tracing::warn!(line = index + 1, "stray 'end' outside a layer"),
            }
            continue;
        }

        let Some(current) = state.as_mut() else {
            tracing::warn!(line = index + 1, "statement outside a layer; ignoring");
            continue;
        };
        if current.poisoned {
            continue;
        }
        if let Err(reason) = current.statement(&tokens) {
            tracing::warn!(
                line = index + 1,
                layer = current.name.as_str(),
                reason,
                "malformed input layer; skipping it"
            );
            current.poisoned = true;
        }
    }

    if let Some(current) = state.take() {
        current.finish(&mut layers);
    }
    layers
}

struct ParseState {
    name: String,
    builder: LayerBuilder,
    source_names: Vec<String>,
    action_names: Vec<String>,
    current_action: Option<String>,
    poisoned: bool,
}

impl ParseState {
    fn new(name: &str) -> ParseState {
        ParseState {
            name: name.to_string(),
            builder: LayerBuilder::new(name),
            source_names: Vec::new(),
            action_names: Vec::new(),
            current_action: None,
            poisoned: false,
        }
    }

    fn finish(self, layers: &mut Vec<InputActionLayer>) {
        if self.poisoned {
            return;
        }
        match self.builder.finalize() {
            Ok(layer) => layers.push(layer),
            Err(error) => {
                tracing::warn!(layer = self.name.as_str(), %error, "layer failed to finalize")
            }
        }
    }

    fn statement(&mut self, tokens: &[&str]) -> Result<(), &'static str> {
        match tokens[0] {
            "source" => self.parse_source(&tokens[1..]),
            "action" => self.parse_action(&tokens[1..]),
            "behavior" => self.parse_behavior(&tokens[1..]),
            "when" => self.parse_condition(&tokens[1..], true),
            "and" => self.parse_condition(&tokens[1..], false),
            "or" => self.parse_or_condition(&tokens[1..]),
            "do" => self.parse_step(&tokens[1..]),
            "final" => self.parse_final(),
            "modifier" => self.parse_modifier(&tokens[1..]),
            _ => Err("unknown keyword"),
        }
    }

    fn parse_source(&mut self, tokens: &[&str]) -> Result<(), &'static str> {
        // source <kind> <name> = <binding>[, ...] [deadzone <f32>]
        let kind = match *tokens.first().ok_or("missing source kind")? {
            "key" => SourceKind::Key,
            "button" => SourceKind::Button,
            "trigger" => SourceKind::Trigger,
            "axis1d" => SourceKind::Axis1d,
            "axis2d" => SourceKind::Axis2d,
            _ => return Err("unknown source kind"),
        };
        let name = *tokens.get(1).ok_or("missing source name")?;
        if *tokens.get(2).ok_or("missing '=' after source name")? != "=" {
            return Err("missing '=' after source name");
        }

        let mut bindings = Vec::new();
        let mut deadzone = None;
        let mut rest = tokens[3..].iter();
        while let Some(&token) = rest.next() {
            if token == "deadzone" {
                let value = rest.next().ok_or("deadzone without a value")?;
                deadzone = Some(value.parse::<f32>().map_err(|_| "bad deadzone value")?);
                continue;
            }
            let binding = token.trim_end_matches(',');
            if !binding.is_empty() {
                bindings.push(input_binding_id(binding));
            }
        }
        if bindings.is_empty() {
            return Err("source has no bindings");
        }

        let source = self.builder.define_source(name, kind);
        for binding in bindings {
            source.bind(binding);
        }
        if let Some(value) = deadzone {
            source.deadzone(value);
        }
        self.source_names.push(name.to_string());
        Ok(())
    }

    fn parse_action(&mut self, tokens: &[&str]) -> Result<(), &'static str> {
        // action <name>: <bool|axis1|axis2>
        let name = tokens
            .first()
            .ok_or("missing action name")?
            .trim_end_matches(':');
        let data = match *tokens.get(1).ok_or("missing action data type")? {
            "bool" => DataKind::Bool,
            "axis1" => DataKind::Axis1,
            "axis2" => DataKind::Axis2,
            _ => return Err("unknown action data type"),
        };

        self.builder.define_action(name, data);
        self.action_names.push(name.to_string());
        self.current_action = Some(name.to_string());
        Ok(())
    }

    fn current_action(&mut self) -> Result<&mut super::builder::ActionBuilder, &'static str> {
        let name = self
            .current_action
            .clone()
            .ok_or("statement before any action")?;
        self.builder
            .action_mut(&name)
            .ok_or("statement before any action")
    }

    fn parse_behavior(&mut self, tokens: &[&str]) -> Result<(), &'static str> {
        let behavior = match *tokens.first().ok_or("missing behavior")? {
            "continuous" => Behavior::Continuous,
            "once" => Behavior::ActiveOnce,
            "toggled" => Behavior::Toggled,
            "accumulated" => Behavior::Accumulated,
            _ => return Err("unknown behavior"),
        };
        self.current_action()?.set_behavior(behavior);
        Ok(())
    }

    fn condition_id(token: &str) -> Result<ConditionId, &'static str> {
        Ok(match token {
            "pressed" => ConditionId::Pressed,
            "released" => ConditionId::Released,
            "trigger" => ConditionId::Trigger,
            "above" => ConditionId::AxisAbove,
            "below" => ConditionId::AxisBelow,
            "moved" => ConditionId::AxisMoved,
            "enabled" => ConditionId::ActionEnabled,
            "disabled" => ConditionId::ActionDisabled,
            "active" => ConditionId::ActionActive,
            "inactive" => ConditionId::ActionInactive,
            _ => return Err("unknown condition"),
        })
    }

    /// `when <cond> <ref> [param]` opens a series; `and ...` extends it.
    fn parse_condition(&mut self, tokens: &[&str], opens_series: bool) -> Result<(), &'static str> {
        let id = Self::condition_id(tokens.first().ok_or("missing condition")?)?;
        let reference = *tokens.get(1).ok_or("missing condition source")?;
        let param = match tokens.get(2) {
            Some(token) => token.parse::<f32>().map_err(|_| "bad condition parameter")?,
            None => 0.0,
        };

        self.check_reference(id, reference)?;
        let action = self.current_action()?;
        let series = if opens_series {
            action.series()
        } else {
            action.last_series_mut().ok_or("'and' before any 'when'")?
        };

        if id.is_action_check() {
            let target = (reference != "self").then_some(reference);
            if opens_series {
                series.action_condition(target, id, param);
            } else {
                series.and_action_condition(target, id, param);
            }
        } else if opens_series {
            series.condition(reference, id, param);
        } else {
            series.and_condition(reference, id, param);
        }
        Ok(())
    }

    fn parse_or_condition(&mut self, tokens: &[&str]) -> Result<(), &'static str> {
        let id = Self::condition_id(tokens.first().ok_or("missing condition")?)?;
        let reference = *tokens.get(1).ok_or("missing condition source")?;
        let param = match tokens.get(2) {
            Some(token) => token.parse::<f32>().map_err(|_| "bad condition parameter")?,
            None => 0.0,
        };

        self.check_reference(id, reference)?;
        let action = self.current_action()?;
        let series = action.last_series_mut().ok_or("'or' before any 'when'")?;
        if id.is_action_check() {
            let target = (reference != "self").then_some(reference);
            series.action_condition(target, id, param);
        } else {
            series.condition(reference, id, param);
        }
        Ok(())
    }

    /// References must resolve before finalize so a bad layer degrades to a
    /// warning instead of a failed build.
    fn check_reference(&self, id: ConditionId, reference: &str) -> Result<(), &'static str> {
        let (name, _) = super::layer::parse_axis_suffix(reference);
        if id.is_action_check() {
            if name != "self" && !self.action_names.iter().any(|a| a == name) {
                return Err("condition references an unknown action");
            }
        } else if !self.source_names.iter().any(|s| s == name) {
            return Err("condition references an unknown source");
        }
        Ok(())
    }

    fn parse_step(&mut self, tokens: &[&str]) -> Result<(), &'static str> {
        let step = *tokens.first().ok_or("missing step")?;
        let runtime_step = match step {
            "activate" => Some(StepId::Activate),
            "deactivate" => Some(StepId::Deactivate),
            "enable" => Some(StepId::Enable),
            "disable" => Some(StepId::Disable),
            "reset" => Some(StepId::Reset),
            _ => None,
        };

        if let Some(id) = runtime_step {
            let action = self.current_action()?;
            let series = action.last_series_mut().ok_or("'do' before any 'when'")?;
            if series.has_conditions() {
                series.step(id);
                return Ok(());
            }
            return Err("'do' before any condition");
        }

        // do <set|add|sub> <source>.<axis> -> .<axis>
        let id = match step {
            "set" => StepId::Set,
            "add" => StepId::Add,
            "sub" => StepId::Sub,
            _ => return Err("unknown step"),
        };
        let source = *tokens.get(1).ok_or("missing step source")?;
        if *tokens.get(2).ok_or("missing '->' in step")? != "->" {
            return Err("missing '->' in step");
        }
        let target = *tokens.get(3).ok_or("missing step target axis")?;

        let (name, _) = super::layer::parse_axis_suffix(source);
        if !self.source_names.iter().any(|s| s == name) {
            return Err("step references an unknown source");
        }

        let action = self.current_action()?;
        let series = action.last_series_mut().ok_or("'do' before any 'when'")?;
        if !series.has_conditions() {
            return Err("'do' before any condition");
        }
        series.value_step(source, id, target);
        Ok(())
    }

    fn parse_final(&mut self) -> Result<(), &'static str> {
        let action = self.current_action()?;
        let series = action.last_series_mut().ok_or("'final' before any 'when'")?;
        series.make_final();
        Ok(())
    }

    fn parse_modifier(&mut self, tokens: &[&str]) -> Result<(), &'static str> {
        // modifier <action> <negate|scale|deadzone|clamp> <param> .<axes>
        let action_name = *tokens.first().ok_or("missing modifier action")?;
        let id = match *tokens.get(1).ok_or("missing modifier id")? {
            "negate" => super::types::ModifierId::Negate,
            "scale" => super::types::ModifierId::Scale,
            "deadzone" => super::types::ModifierId::Deadzone,
            "clamp" => super::types::ModifierId::Clamp,
            _ => return Err("unknown modifier"),
        };
        let param = tokens
            .get(2)
            .ok_or("missing modifier parameter")?
            .parse::<f32>()
            .map_err(|_| "bad modifier parameter")?;
        let axes = *tokens.get(3).ok_or("missing modifier axes")?;
        if !axes.starts_with('.') || axes.len() < 2 {
            return Err("modifier axes look like '.xy'");
        }

        let action = self
            .builder
            .action_mut(action_name)
            .ok_or("modifier references an unknown action")?;
        action.modifier(id, param, axes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::executor::InputActionExecutor;
    use super::super::types::{input_binding_id, InputEvent, InputValue};
    use super::*;

    const SCRIPT: &str = r#"
# gameplay bindings
layer gameplay
  source key jump = kb.space, pad.a
  source axis2d look = mouse.pos deadzone 0.05

  action fire: bool
    behavior once
    when pressed jump
      do activate
    final

  action aim: axis2
    when moved look
      do activate
      do set look.x -> .x
      do set look.y -> .y
  modifier aim scale 2.0 .xy
end

layer menu
  source key confirm = kb.enter
  action accept: bool
    when pressed confirm
      do activate
end
"#;

    #[test]
    fn test_parses_multiple_layers() {
        let layers = parse_layers(SCRIPT);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].name(), "gameplay");
        assert_eq!(layers[1].name(), "menu");
        assert_eq!(layers[0].actions().len(), 2);
        assert_eq!(layers[1].actions().len(), 1);
    }

    #[test]
    fn test_parsed_layer_evaluates() {
        let layers = parse_layers(SCRIPT);
        let layer = &layers[0];
        let executor = InputActionExecutor::new();
        let mut values = layer.create_storage();
        let mut runtimes = layer.create_runtimes();

        let mut events = vec![InputEvent {
            id: input_binding_id("pad.a"),
            axis: 0,
            value: InputValue::Button { pressed: true },
        }];
        layer.process_inputs(&mut events, &mut values);
        layer.update_actions(&executor, &values, &mut runtimes);
        assert!(runtimes["fire"].active);
    }

    #[test]
    fn test_malformed_layer_is_skipped_not_fatal() {
        let script = r#"
layer broken
  source key jump = kb.space
  action fire: bool
    when pressed missing_source
      do activate
end

layer healthy
  source key go = kb.w
  action walk: bool
    when pressed go
      do activate
end
"#;
        let layers = parse_layers(script);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].name(), "healthy");
    }

    #[test]
    fn test_unterminated_layer_still_returned() {
        let script = "layer open\n  source key a = kb.a\n  action act: bool\n    when pressed a\n      do activate\n";
        let layers = parse_layers(script);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].name(), "open");
    }

    #[test]
    fn test_comments_and_blanks_ignored() {
        let script = "# just a comment\n\nlayer empty\nend\n";
        let layers = parse_layers(script);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].actions().len(), 0);
    }
}
