//! Dockerfile to build graph conversion.
//!
//! Covers the instructions applications use to describe how they are built
//! and started. Stages built on a registry image start from that image's
//! config, which the caller resolves up front (see [`base_images`]).

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::buildkit::{CopyOptions, Exec, GraphBuilder, ImageConfig, Layer};
use crate::error::{AssistError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub keyword: String,
    pub args: String,
    pub line: usize,
}

#[derive(Debug)]
pub struct Compiled {
    pub layer: Layer,
    pub config: ImageConfig,
}

#[derive(Clone)]
struct Stage {
    name: Option<String>,
    layer: Layer,
    config: ImageConfig,
    cmd_set_here: bool,
    args: HashMap<String, String>,
}

/// Splits a Dockerfile into instructions, joining `\` continuations and
/// dropping comments and blank lines.
pub fn parse_instructions(content: &str) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut pending = String::new();
    let mut start_line = 0;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();

        // Blank lines inside a continuation are skipped too
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if pending.is_empty() {
            start_line = idx + 1;
        }

        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped.trim_end());
            pending.push(' ');
            continue;
        }

        pending.push_str(line);
        instructions.push(split_instruction(&pending, start_line)?);
        pending.clear();
    }

    if !pending.trim().is_empty() {
        instructions.push(split_instruction(pending.trim_end(), start_line)?);
    }

    Ok(instructions)
}

fn split_instruction(text: &str, line: usize) -> Result<Instruction> {
    let text = text.trim();
    let (keyword, args) = match text.split_once(char::is_whitespace) {
        Some((k, a)) => (k, a.trim()),
        None => (text, ""),
    };

    if keyword.is_empty() {
        return Err(AssistError::validation(format!(
            "Dockerfile line {}: empty instruction",
            line
        )));
    }

    Ok(Instruction {
        keyword: keyword.to_uppercase(),
        args: args.to_string(),
        line,
    })
}

/// Registry images the stages start from, after `ARG` substitution.
/// Earlier stages and `scratch` are not included.
pub fn base_images(content: &str) -> Result<Vec<String>> {
    let mut global_args: HashMap<String, String> = HashMap::new();
    let mut stage_names: Vec<Option<String>> = Vec::new();
    let mut images = Vec::new();

    for inst in parse_instructions(content)? {
        match inst.keyword.as_str() {
            "FROM" => {
                let (image, name) = from_args(&inst)?;
                let image = expand(image, &global_args);
                let lower = image.to_lowercase();

                let is_stage = stage_names.iter().any(|n| n.as_deref() == Some(lower.as_str()))
                    || image.parse::<usize>().is_ok_and(|i| i < stage_names.len());
                if !is_stage && image != "scratch" && !images.contains(&image) {
                    images.push(image);
                }
                stage_names.push(name);
            }
            "ARG" if stage_names.is_empty() => {
                for (key, value) in parse_arg(&inst.args, &global_args) {
                    global_args.insert(key, value);
                }
            }
            _ => {}
        }
    }

    Ok(images)
}

/// Converts the Dockerfile into a graph whose local sources come from `context`.
/// Registry images are treated as having an empty config.
pub fn compile(content: &str, builder: &mut GraphBuilder, context: &Layer) -> Result<Compiled> {
    compile_with_bases(content, builder, context, &HashMap::new())
}

/// Like [`compile`], seeding each stage built on a registry image with its
/// entry in `bases`.
pub fn compile_with_bases(
    content: &str,
    builder: &mut GraphBuilder,
    context: &Layer,
    bases: &HashMap<String, ImageConfig>,
) -> Result<Compiled> {
    let instructions = parse_instructions(content)?;
    let mut global_args: HashMap<String, String> = HashMap::new();
    let mut stages: Vec<Stage> = Vec::new();

    for inst in &instructions {
        if inst.keyword == "FROM" {
            let stage = from_stage(inst, builder, &stages, &global_args, bases)?;
            stages.push(stage);
            continue;
        }

        let Some((stage, previous)) = stages.split_last_mut() else {
            if inst.keyword == "ARG" {
                for (key, value) in parse_arg(&inst.args, &global_args) {
                    global_args.insert(key, value);
                }
                continue;
            }
            return Err(line_error(inst, "expected FROM before other instructions"));
        };

        apply(inst, stage, builder, context, previous)?;
    }

    let last = stages
        .pop()
        .ok_or_else(|| AssistError::validation("Dockerfile has no FROM instruction"))?;

    Ok(Compiled {
        layer: last.layer,
        config: last.config,
    })
}

fn from_stage(
    inst: &Instruction,
    builder: &mut GraphBuilder,
    stages: &[Stage],
    global_args: &HashMap<String, String>,
    bases: &HashMap<String, ImageConfig>,
) -> Result<Stage> {
    let (image, name) = from_args(inst)?;
    let image = expand(image, global_args);

    if let Some(parent) = find_stage(stages, &image) {
        return Ok(Stage {
            name,
            layer: parent.layer.clone(),
            config: parent.config.clone(),
            cmd_set_here: false,
            args: HashMap::new(),
        });
    }

    if image == "scratch" {
        return Ok(Stage {
            name,
            layer: Layer::scratch(),
            config: ImageConfig::default(),
            cmd_set_here: false,
            args: HashMap::new(),
        });
    }

    let config = bases.get(&image).cloned().unwrap_or_default();
    let mut layer = builder.image(&image);
    for (key, value) in &config.env {
        layer = layer.with_env(key, value);
    }
    if !config.working_dir.is_empty() {
        layer = layer.with_dir(&config.working_dir);
    }

    Ok(Stage {
        name,
        layer,
        config,
        cmd_set_here: false,
        args: HashMap::new(),
    })
}

/// `image [AS name]`, ignoring flags such as `--platform`.
fn from_args(inst: &Instruction) -> Result<(&str, Option<String>)> {
    let words: Vec<&str> = inst
        .args
        .split_whitespace()
        .filter(|w| !w.starts_with("--"))
        .collect();

    match words.as_slice() {
        [image] => Ok((*image, None)),
        [image, as_kw, name] if as_kw.eq_ignore_ascii_case("as") => {
            Ok((*image, Some(name.to_lowercase())))
        }
        _ => Err(line_error(inst, "FROM expects `image [AS name]`")),
    }
}

fn find_stage<'a>(stages: &'a [Stage], reference: &str) -> Option<&'a Stage> {
    let lower = reference.to_lowercase();
    stages
        .iter()
        .find(|s| s.name.as_deref() == Some(lower.as_str()))
        .or_else(|| reference.parse::<usize>().ok().and_then(|i| stages.get(i)))
}

fn apply(
    inst: &Instruction,
    stage: &mut Stage,
    builder: &mut GraphBuilder,
    context: &Layer,
    previous: &[Stage],
) -> Result<()> {
    let vars = stage_vars(stage);

    match inst.keyword.as_str() {
        "RUN" => {
            let args = command_form(&inst.args);
            if args.is_empty() {
                return Err(line_error(inst, "RUN needs a command"));
            }
            stage.layer = builder.run(&stage.layer, Exec::new(args));
        }
        "COPY" | "ADD" => {
            let (flags, rest) = split_flags(&inst.args);
            let mut paths = json_array(rest)
                .unwrap_or_else(|| rest.split_whitespace().map(str::to_string).collect());

            if paths.len() < 2 {
                return Err(line_error(inst, "expected at least one source and a destination"));
            }

            let dest = expand(&paths.pop().unwrap_or_default(), &vars);
            let from = match flags.get("from") {
                Some(reference) => match find_stage(previous, reference) {
                    Some(s) => s.layer.clone(),
                    None => builder.image(reference),
                },
                None => context.clone(),
            };

            for src in &paths {
                let src = expand(src, &vars);
                if inst.keyword == "ADD" && (src.starts_with("http://") || src.starts_with("https://")) {
                    return Err(line_error(inst, "ADD from a URL is not supported"));
                }

                stage.layer = builder.copy(
                    &stage.layer,
                    &from,
                    &src,
                    &dest,
                    CopyOptions {
                        allow_wildcard: true,
                        create_dest_path: true,
                        excludes: Vec::new(),
                    },
                );
            }
        }
        "WORKDIR" => {
            let dir = expand(&inst.args, &vars);
            stage.layer = stage.layer.clone().with_dir(&dir);
            let resolved = stage.layer.dir().to_string();
            stage.layer = builder.mkdir(&stage.layer, &resolved, 0o755);
            stage.config.working_dir = resolved;
        }
        "ENV" => {
            for (key, value) in parse_key_values(&inst.args, &vars) {
                stage.layer = stage.layer.clone().with_env(&key, &value);
                stage.config.env.retain(|(k, _)| *k != key);
                stage.config.env.push((key, value));
            }
        }
        "ARG" => {
            for (key, value) in parse_arg(&inst.args, &vars) {
                stage.args.insert(key, value);
            }
        }
        "ENTRYPOINT" => {
            stage.config.entrypoint = command_form(&inst.args);
            if !stage.cmd_set_here {
                stage.config.cmd.clear();
            }
        }
        "CMD" => {
            stage.config.cmd = command_form(&inst.args);
            stage.cmd_set_here = true;
        }
        "EXPOSE" => {
            for port in expand(&inst.args, &vars).split_whitespace() {
                if !stage.config.exposed_ports.iter().any(|p| p == port) {
                    stage.config.exposed_ports.push(port.to_string());
                }
            }
        }
        "USER" => stage.config.user = Some(expand(&inst.args, &vars)),
        "LABEL" | "MAINTAINER" | "STOPSIGNAL" | "HEALTHCHECK" | "SHELL" | "VOLUME"
        | "ONBUILD" => {}
        other => {
            return Err(line_error(
                inst,
                &format!("unknown Dockerfile instruction: {}", other),
            ))
        }
    }

    Ok(())
}

fn stage_vars(stage: &Stage) -> HashMap<String, String> {
    let mut vars = stage.args.clone();
    for (key, value) in &stage.config.env {
        vars.insert(key.clone(), value.clone());
    }
    vars
}

fn line_error(inst: &Instruction, message: &str) -> AssistError {
    AssistError::validation(format!(
        "Dockerfile line {} ({}): {}",
        inst.line, inst.keyword, message
    ))
}

/// JSON exec form, or shell form wrapped in `/bin/sh -c`.
fn command_form(args: &str) -> Vec<String> {
    if let Some(words) = json_array(args) {
        return words;
    }
    if args.trim().is_empty() {
        return Vec::new();
    }
    vec!["/bin/sh".to_string(), "-c".to_string(), args.trim().to_string()]
}

fn json_array(args: &str) -> Option<Vec<String>> {
    let trimmed = args.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

fn split_flags(args: &str) -> (HashMap<String, String>, &str) {
    let mut flags = HashMap::new();
    let mut rest = args.trim_start();

    while let Some(stripped) = rest.strip_prefix("--") {
        let end = stripped.find(char::is_whitespace).unwrap_or(stripped.len());
        let flag = &stripped[..end];
        match flag.split_once('=') {
            Some((k, v)) => flags.insert(k.to_lowercase(), v.to_string()),
            None => flags.insert(flag.to_lowercase(), String::new()),
        };
        rest = stripped[end..].trim_start();
    }

    (flags, rest)
}

fn parse_arg(args: &str, vars: &HashMap<String, String>) -> Vec<(String, String)> {
    args.split_whitespace()
        .map(|word| match word.split_once('=') {
            Some((k, v)) => (k.to_string(), expand(&unquote(v), vars)),
            None => (word.to_string(), vars.get(word).cloned().unwrap_or_default()),
        })
        .collect()
}

/// `ENV a=1 b="two words"` or the legacy `ENV a 1`.
fn parse_key_values(args: &str, vars: &HashMap<String, String>) -> Vec<(String, String)> {
    let args = args.trim();
    let first = args.split_whitespace().next().unwrap_or_default();

    if !first.contains('=') {
        let value = args[first.len()..].trim();
        return vec![(first.to_string(), expand(&unquote(value), vars))];
    }

    let mut pairs = Vec::new();
    let mut local = vars.clone();
    for token in tokenize_pairs(args) {
        if let Some((key, value)) = token.split_once('=') {
            let value = expand(&unquote(value), &local);
            local.insert(key.to_string(), value.clone());
            pairs.push((key.to_string(), value));
        }
    }
    pairs
}

fn tokenize_pairs(args: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = args.chars();

    while let Some(c) = chars.next() {
        match (c, quote) {
            ('\\', _) => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ('"' | '\'', None) => {
                quote = Some(c);
                current.push(c);
            }
            (q, Some(open)) if q == open => {
                quote = None;
                current.push(c);
            }
            (c, None) if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return value[1..value.len() - 1].replace(&format!("\\{}", q), &q.to_string());
        }
    }
    value.replace("\\ ", " ")
}

fn var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("valid regex")
    })
}

/// Substitutes `$VAR`, `${VAR}` and `${VAR:-default}`.
fn expand(text: &str, vars: &HashMap<String, String>) -> String {
    var_regex()
        .replace_all(text, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match vars.get(name).filter(|v| !v.is_empty()) {
                Some(value) => value.clone(),
                None => caps
                    .get(2)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildkit::{graph::FileAction, LocalOptions, Op, Platform};

    fn compile_str(content: &str) -> Result<(Compiled, crate::buildkit::Definition)> {
        let mut builder = GraphBuilder::new(Platform::linux_amd64());
        let context = builder.local("context", LocalOptions::default()).unwrap();
        let compiled = compile(content, &mut builder, &context)?;
        let def = builder.build(&compiled.layer).unwrap();
        Ok((compiled, def))
    }

    #[test]
    fn test_parse_instructions_joins_continuations() {
        let content = "# syntax comment\nFROM python:3.12\n\nRUN apt-get update && \\\n    apt-get install -y git\nexpose 8080\n";
        let instructions = parse_instructions(content).unwrap();

        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[1].keyword, "RUN");
        assert_eq!(
            instructions[1].args,
            "apt-get update && apt-get install -y git"
        );
        assert_eq!(instructions[1].line, 4);
        assert_eq!(instructions[2].keyword, "EXPOSE");
    }

    #[test]
    fn test_entrypoint_and_expose() {
        let (compiled, _) = compile_str(
            "FROM python:3.12-slim\nWORKDIR /srv\nCOPY . .\nENTRYPOINT [\"python\",\"app.py\"]\nEXPOSE 8080\n",
        )
        .unwrap();

        assert_eq!(compiled.config.entrypoint, vec!["python", "app.py"]);
        assert!(compiled.config.cmd.is_empty());
        assert_eq!(compiled.config.working_dir, "/srv");
        assert_eq!(compiled.config.exposed_ports, vec!["8080"]);
    }

    #[test]
    fn test_shell_form_cmd() {
        let (compiled, _) = compile_str("FROM alpine\nCMD echo hi\n").unwrap();
        assert_eq!(compiled.config.cmd, vec!["/bin/sh", "-c", "echo hi"]);
    }

    #[test]
    fn test_cmd_before_entrypoint_is_kept() {
        let (compiled, _) =
            compile_str("FROM alpine\nCMD [\"--port\", \"80\"]\nENTRYPOINT [\"server\"]\n").unwrap();
        assert_eq!(compiled.config.entrypoint, vec!["server"]);
        assert_eq!(compiled.config.cmd, vec!["--port", "80"]);
    }

    #[test]
    fn test_entrypoint_resets_inherited_cmd() {
        let (compiled, _) = compile_str(
            "FROM alpine AS base\nCMD [\"sh\"]\nFROM base\nENTRYPOINT [\"server\"]\n",
        )
        .unwrap();
        assert!(compiled.config.cmd.is_empty());
    }

    #[test]
    fn test_multi_stage_copy_from() {
        let (_, def) = compile_str(
            "FROM golang:1.22 AS build\nRUN go build -o /out/app .\nFROM alpine\nCOPY --from=build /out/app /usr/local/bin/app\nCMD [\"app\"]\n",
        )
        .unwrap();

        let copy = def
            .ops
            .iter()
            .find_map(|o| match &o.op {
                Op::File {
                    action: FileAction::Copy { src, dest, from, .. },
                    ..
                } => Some((src.clone(), dest.clone(), from.clone())),
                _ => None,
            })
            .unwrap();

        assert_eq!(copy.0, "/out/app");
        assert_eq!(copy.1, "/usr/local/bin/app");

        let from = copy.2.unwrap();
        assert!(matches!(def.op(&from), Some(Op::Exec { .. })));
    }

    #[test]
    fn test_args_and_env_substitution() {
        let (compiled, def) = compile_str(
            "ARG BASE=python:3.11\nFROM ${BASE}\nARG PORT=9000\nENV APP_HOME=/opt/app GREETING=\"hello there\"\nWORKDIR $APP_HOME\nEXPOSE ${PORT}/tcp 53/udp\n",
        )
        .unwrap();

        assert_eq!(compiled.config.working_dir, "/opt/app");
        assert_eq!(compiled.config.exposed_ports, vec!["9000/tcp", "53/udp"]);
        assert!(compiled
            .config
            .env
            .contains(&("GREETING".to_string(), "hello there".to_string())));
        assert!(def.ops.iter().any(|o| matches!(
            &o.op,
            Op::Source { identifier, .. } if identifier == "docker-image://docker.io/library/python:3.11"
        )));
    }

    fn nginx_config() -> ImageConfig {
        ImageConfig {
            entrypoint: vec!["/docker-entrypoint.sh".to_string()],
            cmd: vec![
                "nginx".to_string(),
                "-g".to_string(),
                "daemon off;".to_string(),
            ],
            working_dir: String::new(),
            env: vec![("NGINX_VERSION".to_string(), "1.27.0".to_string())],
            exposed_ports: vec!["80/tcp".to_string()],
            user: None,
        }
    }

    #[test]
    fn test_base_images() {
        let images = base_images(
            "ARG TAG=1.22\nFROM golang:${TAG} AS build\nFROM build AS test\nFROM scratch\nFROM nginx:alpine\nCOPY --from=build /app /app\nFROM 0\n",
        )
        .unwrap();
        assert_eq!(images, vec!["golang:1.22", "nginx:alpine"]);
    }

    #[test]
    fn test_stage_starts_from_base_config() {
        let mut builder = GraphBuilder::new(Platform::linux_amd64());
        let context = builder.local("context", LocalOptions::default()).unwrap();
        let bases = HashMap::from([("nginx:alpine".to_string(), nginx_config())]);

        let compiled = compile_with_bases(
            "FROM nginx:alpine\nCOPY . /usr/share/nginx/html/$NGINX_VERSION\nEXPOSE 8080\n",
            &mut builder,
            &context,
            &bases,
        )
        .unwrap();

        assert_eq!(compiled.config.entrypoint, vec!["/docker-entrypoint.sh"]);
        assert_eq!(compiled.config.cmd, vec!["nginx", "-g", "daemon off;"]);
        assert_eq!(compiled.config.exposed_ports, vec!["80/tcp", "8080"]);
        assert_eq!(compiled.layer.get_env("NGINX_VERSION"), Some("1.27.0"));

        let def = builder.build(&compiled.layer).unwrap();
        assert!(def.ops.iter().any(|o| matches!(
            &o.op,
            Op::File { action: FileAction::Copy { dest, .. }, .. }
                if dest == "/usr/share/nginx/html/1.27.0"
        )));
    }

    #[test]
    fn test_entrypoint_resets_base_cmd() {
        let mut builder = GraphBuilder::new(Platform::linux_amd64());
        let context = builder.local("context", LocalOptions::default()).unwrap();
        let bases = HashMap::from([("nginx:alpine".to_string(), nginx_config())]);

        let compiled = compile_with_bases(
            "FROM nginx:alpine\nENTRYPOINT [\"nginx\"]\n",
            &mut builder,
            &context,
            &bases,
        )
        .unwrap();

        assert_eq!(compiled.config.entrypoint, vec!["nginx"]);
        assert!(compiled.config.cmd.is_empty());
    }

    #[test]
    fn test_legacy_env_form() {
        let (compiled, _) = compile_str("FROM alpine\nENV PATH_PREFIX /usr/local\n").unwrap();
        assert_eq!(
            compiled.config.env,
            vec![("PATH_PREFIX".to_string(), "/usr/local".to_string())]
        );
    }

    #[test]
    fn test_errors() {
        assert!(compile_str("RUN echo hi\n").is_err());
        assert!(compile_str("# only a comment\n").is_err());

        let err = compile_str("FROM alpine\nFROBNICATE now\n").unwrap_err();
        assert!(err.to_string().contains("unknown Dockerfile instruction: FROBNICATE"));

        assert!(compile_str("FROM alpine\nADD https://example.com/x.tgz /x\n").is_err());
    }

    #[test]
    fn test_expand() {
        let vars: HashMap<String, String> =
            [("A".to_string(), "1".to_string())].into_iter().collect();
        assert_eq!(expand("$A-${A}-${B:-two}-$B", &vars), "1-1-two-");
    }
}
