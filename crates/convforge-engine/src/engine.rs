//! The conversion engine: walks a pipeline's operations against a context
//! store and dispatches each to its execution strategy.
//!
//! Every template and guard of a pipeline is parsed before the first
//! operation runs, so a malformed pipeline never leaves half-finished
//! output behind.

use convforge_common::{CleanupPolicy, ContextKind, Error, Result, Scope, SequenceType};
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, error, info};

use crate::audio::{self, ChannelLayout, OutputChannel};
use crate::cleanup::{cleanup, CleanupReport};
use crate::context::ContextStore;
use crate::exec::{run_once, CommandSpec, ExecEnv, OperationName, ResolvedCommand};
use crate::operation::{CycleEach, ExecDecl, Operation, ParamTarget, Pipeline};
use crate::pipe::{run_pipe, PipePlan};
use crate::template::{count_range, is_identifier, Guard, Template};

/// A pipe operation with parsed templates.
#[derive(Debug, Clone)]
struct PipeSpec {
    name: OperationName,
    when: Option<Guard>,
    cycles: Vec<CycleSpec>,
    tail: Vec<CommandSpec>,
}

#[derive(Debug, Clone)]
struct CycleSpec {
    each: CycleEach,
    types: Vec<SequenceType>,
    stages: Vec<CommandSpec>,
}

#[derive(Debug, Clone)]
struct ParameterSpec {
    name: OperationName,
    param: String,
    value: Template,
    kind: ContextKind,
    cleanup: CleanupPolicy,
    when: Option<Guard>,
}

#[derive(Debug, Clone)]
enum LoopBound {
    To(Template),
    Count(Template),
}

#[derive(Debug, Clone)]
struct ForSpec {
    name: OperationName,
    var: String,
    from: Option<Template>,
    bound: LoopBound,
    steps: Vec<Step>,
}

#[derive(Debug, Clone)]
struct AudioMapSpec {
    name: OperationName,
    layout: Template,
    mapping: Option<Vec<OutputChannel>>,
    parameter: String,
}

/// A compiled operation.
#[derive(Debug, Clone)]
enum Step {
    Exec(CommandSpec),
    EachSegment {
        name: OperationName,
        steps: Vec<Step>,
    },
    EachSequence {
        name: OperationName,
        types: Vec<SequenceType>,
        steps: Vec<Step>,
    },
    Pipe(PipeSpec),
    Parameter(ParameterSpec),
    If {
        name: OperationName,
        condition: Guard,
        then: Vec<Step>,
        otherwise: Vec<Step>,
    },
    For(ForSpec),
    AudioMap(AudioMapSpec),
}

/// Check a pipeline without running it: every operation kind must be known,
/// every template and guard must parse, and every pipe must declare a tail.
pub fn validate(pipeline: &Pipeline) -> Result<()> {
    compile(pipeline).map(|_| ())
}

fn compile(pipeline: &Pipeline) -> Result<Vec<Step>> {
    Compiler {
        source: &pipeline.name,
    }
    .list(&pipeline.operations, "operations")
}

struct Compiler<'a> {
    source: &'a str,
}

impl Compiler<'_> {
    fn name(&self, id: impl Into<String>) -> OperationName {
        OperationName::new(id, self.source)
    }

    fn list(&self, ops: &[Operation], path: &str) -> Result<Vec<Step>> {
        ops.iter()
            .enumerate()
            .map(|(i, op)| self.operation(op, &format!("{path}[{i}]")))
            .collect()
    }

    fn command(&self, decl: &ExecDecl) -> Result<CommandSpec> {
        CommandSpec::parse(
            self.name(&decl.name),
            &decl.template,
            decl.output.as_deref(),
            decl.when.as_deref(),
        )
        .map_err(|e| e.in_operation(self.name(&decl.name).to_string(), Scope::global()))
    }

    fn operation(&self, op: &Operation, path: &str) -> Result<Step> {
        let step = match op {
            Operation::ExecOnce(decl) => Step::Exec(self.command(decl)?),

            Operation::ExecEachSegment(decl) => Step::EachSegment {
                name: self.name(decl.name.as_deref().unwrap_or(op.kind())),
                steps: self.list(&decl.operations, &format!("{path}.operations"))?,
            },

            Operation::ExecEachSequence(decl) => Step::EachSequence {
                name: self.name(decl.name.as_deref().unwrap_or(op.kind())),
                types: decl.types.clone(),
                steps: self.list(&decl.operations, &format!("{path}.operations"))?,
            },

            Operation::Pipe(decl) => {
                if decl.tail.is_empty() {
                    return Err(Error::config(format!(
                        "pipe '{}' at {path} declares no tail stages",
                        decl.name
                    )));
                }
                let cycles = decl
                    .cycles
                    .iter()
                    .map(|cycle| {
                        Ok(CycleSpec {
                            each: cycle.each,
                            types: cycle.types.clone(),
                            stages: cycle
                                .stages
                                .iter()
                                .map(|s| self.command(s))
                                .collect::<Result<_>>()?,
                        })
                    })
                    .collect::<Result<_>>()?;
                Step::Pipe(PipeSpec {
                    name: self.name(&decl.name),
                    when: parse_guard(decl.when.as_deref(), &self.name(&decl.name))?,
                    cycles,
                    tail: decl
                        .tail
                        .iter()
                        .map(|s| self.command(s))
                        .collect::<Result<_>>()?,
                })
            }

            Operation::DynamicParameter(decl) => {
                let name = self.name(&decl.name);
                Step::Parameter(ParameterSpec {
                    param: decl.name.clone(),
                    value: Template::parse(&decl.value)
                        .map_err(|e| e.in_operation(name.to_string(), Scope::global()))?,
                    kind: match decl.context {
                        ParamTarget::Dynamic => ContextKind::Dynamic,
                        ParamTarget::Tmp => ContextKind::Tmp,
                    },
                    cleanup: decl.cleanup,
                    when: parse_guard(decl.when.as_deref(), &name)?,
                    name,
                })
            }

            Operation::If(decl) => {
                let name = self.name(format!("if {}", decl.condition));
                Step::If {
                    condition: Guard::parse(&decl.condition)
                        .map_err(|e| e.in_operation(name.to_string(), Scope::global()))?,
                    then: self.list(&decl.then, &format!("{path}.then"))?,
                    otherwise: self.list(&decl.otherwise, &format!("{path}.else"))?,
                    name,
                }
            }

            Operation::For(decl) => {
                let name = self.name(format!("for {}", decl.var));
                if !is_identifier(&decl.var) {
                    return Err(Error::config(format!(
                        "invalid loop variable '{}' at {path}",
                        decl.var
                    )));
                }
                let parse = |src: &str| {
                    Template::parse(src)
                        .map_err(|e| e.in_operation(name.to_string(), Scope::global()))
                };
                let bound = match (&decl.to, &decl.count) {
                    (Some(to), None) => LoopBound::To(parse(to)?),
                    (None, Some(count)) => LoopBound::Count(parse(count)?),
                    _ => {
                        return Err(Error::config(format!(
                            "loop '{}' at {path} needs exactly one of 'to' or 'count'",
                            decl.var
                        )))
                    }
                };
                let from = decl.from.as_deref().map(parse).transpose()?;
                let bound_template = match &bound {
                    LoopBound::To(t) | LoopBound::Count(t) => t,
                };
                if from
                    .iter()
                    .chain(std::iter::once(bound_template))
                    .any(|t| t.references_var(&decl.var))
                {
                    return Err(Error::config(format!(
                        "bounds of loop '{}' at {path} may not reference the loop variable",
                        decl.var
                    )));
                }
                Step::For(ForSpec {
                    var: decl.var.clone(),
                    from,
                    bound,
                    steps: self.list(&decl.operations, &format!("{path}.operations"))?,
                    name,
                })
            }

            Operation::AudioMap(decl) => {
                let name = self.name(&decl.name);
                let mapping = if decl.mapping.is_empty() {
                    None
                } else {
                    Some(
                        decl.mapping
                            .iter()
                            .map(|m| m.parse::<OutputChannel>())
                            .collect::<Result<Vec<_>>>()
                            .map_err(|e| e.in_operation(name.to_string(), Scope::global()))?,
                    )
                };
                Step::AudioMap(AudioMapSpec {
                    layout: Template::parse(&decl.layout)
                        .map_err(|e| e.in_operation(name.to_string(), Scope::global()))?,
                    mapping,
                    parameter: decl.parameter.clone(),
                    name,
                })
            }

            Operation::Unrecognized => {
                return Err(Error::config(format!(
                    "unrecognized operation kind at {path}"
                )))
            }
        };
        Ok(step)
    }
}

fn parse_guard(source: Option<&str>, name: &OperationName) -> Result<Option<Guard>> {
    source
        .map(Guard::parse)
        .transpose()
        .map_err(|e| e.in_operation(name.to_string(), Scope::global()))
}

fn parse_integer(template: &Template, value: &str) -> Result<i64> {
    value.parse().map_err(|_| {
        Error::template(
            template.source(),
            format!("loop bound '{value}' is not an integer"),
        )
    })
}

/// Runs pipelines against one context store.
#[derive(Debug)]
pub struct ConversionEngine {
    store: ContextStore,
    env: ExecEnv,
    cleanup_enabled: bool,
}

impl ConversionEngine {
    /// Create an engine. Cleanup after a run is enabled.
    pub fn new(store: ContextStore, env: ExecEnv) -> Self {
        Self {
            store,
            env,
            cleanup_enabled: true,
        }
    }

    /// Builder: whether to remove cleanup-flagged files after a run.
    #[must_use]
    pub fn with_cleanup(mut self, enabled: bool) -> Self {
        self.cleanup_enabled = enabled;
        self
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn env(&self) -> &ExecEnv {
        &self.env
    }

    /// Run every operation of `pipeline` in order, stopping at the first
    /// failure, then clean up.
    pub async fn run(&mut self, pipeline: &Pipeline) -> Result<()> {
        let steps = compile(pipeline)?;
        self.env.reset_counter();

        info!(
            pipeline = %pipeline.name,
            operations = steps.len(),
            working_dir = %self.env.workspace().working_dir().display(),
            dry_run = self.env.is_dry_run(),
            "conversion started"
        );

        let result = self.execute(&steps, Scope::global()).await;
        match &result {
            Ok(()) => info!(pipeline = %pipeline.name, "conversion finished"),
            Err(e) => error!(pipeline = %pipeline.name, error = %e, "conversion failed"),
        }

        if self.cleanup_enabled {
            let report = self.cleanup(result.is_err());
            info!(
                removed = report.removed,
                missing = report.missing,
                failed = report.failed,
                "cleanup finished"
            );
        }

        result
    }

    /// Remove files named by cleanup-flagged parameters.
    pub fn cleanup(&self, run_failed: bool) -> CleanupReport {
        cleanup(&self.store, self.env.workspace(), run_failed)
    }

    fn execute<'a>(&'a mut self, steps: &'a [Step], scope: Scope) -> BoxFuture<'a, Result<()>> {
        async move {
            for step in steps {
                self.step(step, scope).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn step(&mut self, step: &Step, scope: Scope) -> Result<()> {
        match step {
            Step::Exec(spec) => {
                let cmd = self
                    .resolve(spec, scope)
                    .map_err(|e| e.in_operation(spec.name.to_string(), scope))?;
                if let Some(cmd) = cmd {
                    debug!(operation = %spec.name, %scope, argv = ?cmd.argv, "exec-once");
                    run_once(&mut self.env, &cmd)
                        .await
                        .map_err(|e| e.in_operation(spec.name.to_string(), scope))?;
                }
            }

            Step::EachSegment { name, steps } => {
                for segment in self.store.segments().to_vec() {
                    debug!(operation = %name, %segment, "entering segment");
                    self.execute(steps, scope.with_segment(segment)).await?;
                }
            }

            Step::EachSequence { name, types, steps } => {
                let sequences: Vec<_> = self
                    .store
                    .sequences()
                    .into_iter()
                    .filter(|(t, _)| types.is_empty() || types.contains(t))
                    .collect();
                for (seq_type, sequence) in sequences {
                    debug!(operation = %name, %seq_type, %sequence, "entering sequence");
                    let mut inner = scope.with_sequence(seq_type, sequence);
                    inner.resource = None;
                    self.execute(steps, inner).await?;
                }
            }

            Step::Pipe(spec) => {
                let plan = self
                    .plan_pipe(spec, scope)
                    .map_err(|e| e.in_operation(spec.name.to_string(), scope))?;
                if let Some(plan) = plan {
                    run_pipe(&mut self.env, plan)
                        .await
                        .map_err(|e| e.in_operation(spec.name.to_string(), scope))?;
                }
            }

            Step::Parameter(spec) => self
                .set_parameter(spec, scope)
                .map_err(|e| e.in_operation(spec.name.to_string(), scope))?,

            Step::If {
                name,
                condition,
                then,
                otherwise,
            } => {
                let taken = condition
                    .evaluate(&self.store, &scope)
                    .map_err(|e| e.in_operation(name.to_string(), scope))?;
                debug!(operation = %name, %scope, taken, "condition evaluated");
                let branch = if taken { then } else { otherwise };
                self.execute(branch, scope).await?;
            }

            Step::For(spec) => {
                let range = self
                    .loop_range(spec, scope)
                    .map_err(|e| e.in_operation(spec.name.to_string(), scope))?;
                debug!(operation = %spec.name, ?range, "loop");
                for i in range {
                    self.store.set_dynamic(&spec.var, i.to_string());
                    self.execute(&spec.steps, scope).await?;
                }
            }

            Step::AudioMap(spec) => self
                .audio_map(spec, scope)
                .map_err(|e| e.in_operation(spec.name.to_string(), scope))?,
        }
        Ok(())
    }

    fn resolve(&mut self, spec: &CommandSpec, scope: Scope) -> Result<Option<ResolvedCommand>> {
        spec.resolve(&mut self.store, &scope, self.env.workspace())
    }

    /// Apply guards and resolve every stage. `None` when the pipe's own
    /// guard skips it.
    fn plan_pipe(&mut self, spec: &PipeSpec, scope: Scope) -> Result<Option<PipePlan>> {
        if let Some(guard) = &spec.when {
            if !guard.evaluate(&self.store, &scope)? {
                debug!(operation = %spec.name, %scope, guard = guard.source(), "skipped by guard");
                return Ok(None);
            }
        }

        let tail = self.resolve_stages(&spec.tail, scope)?;

        let mut cycles = Vec::new();
        for cycle in &spec.cycles {
            for group_scope in self.cycle_scopes(cycle, scope) {
                let group = self.resolve_stages(&cycle.stages, group_scope)?;
                if group.is_empty() {
                    debug!(operation = %spec.name, scope = %group_scope, "cycle group skipped");
                    continue;
                }
                cycles.push(group);
            }
        }

        Ok(Some(PipePlan {
            name: spec.name.clone(),
            cycles,
            tail,
        }))
    }

    fn resolve_stages(&mut self, stages: &[CommandSpec], scope: Scope) -> Result<Vec<ResolvedCommand>> {
        let mut resolved = Vec::with_capacity(stages.len());
        for stage in stages {
            let cmd = self
                .resolve(stage, scope)
                .map_err(|e| e.in_operation(stage.name.to_string(), scope))?;
            resolved.extend(cmd);
        }
        Ok(resolved)
    }

    fn cycle_scopes(&self, cycle: &CycleSpec, scope: Scope) -> Vec<Scope> {
        match cycle.each {
            CycleEach::Once => vec![scope],
            CycleEach::Segment => self
                .store
                .segments()
                .iter()
                .map(|&segment| scope.with_segment(segment))
                .collect(),
            CycleEach::Sequence => self
                .store
                .sequences()
                .into_iter()
                .filter(|(t, _)| cycle.types.is_empty() || cycle.types.contains(t))
                .map(|(seq_type, sequence)| {
                    let mut inner = scope.with_sequence(seq_type, sequence);
                    inner.resource = None;
                    inner
                })
                .collect(),
        }
    }

    fn set_parameter(&mut self, spec: &ParameterSpec, scope: Scope) -> Result<()> {
        if let Some(guard) = &spec.when {
            if !guard.evaluate(&self.store, &scope)? {
                debug!(operation = %spec.name, guard = guard.source(), "skipped by guard");
                return Ok(());
            }
        }
        let value = spec.value.render(&mut self.store, &scope)?;
        debug!(parameter = %format!("{}.{}", spec.kind, spec.param), %value, "parameter set");
        self.store
            .add_parameter(spec.kind, &scope, &spec.param, value, spec.cleanup)?;
        Ok(())
    }

    fn loop_range(&mut self, spec: &ForSpec, scope: Scope) -> Result<std::ops::RangeInclusive<i64>> {
        let from = match &spec.from {
            Some(t) => parse_integer(t, &t.render(&mut self.store, &scope)?)?,
            None => 0,
        };
        // An empty inclusive range (start > end) yields no iterations.
        let range = match &spec.bound {
            LoopBound::To(t) => from..=parse_integer(t, &t.render(&mut self.store, &scope)?)?,
            LoopBound::Count(t) => {
                let count = parse_integer(t, &t.render(&mut self.store, &scope)?)?;
                if count < 0 {
                    return Err(Error::template(
                        t.source(),
                        format!("loop '{}' has a negative count {count}", spec.var),
                    ));
                }
                count_range(from, count).ok_or_else(|| {
                    Error::template(
                        t.source(),
                        format!(
                            "loop '{}' range from={from} count={count} overflows",
                            spec.var
                        ),
                    )
                })?
            }
        };
        Ok(range)
    }

    fn audio_map(&mut self, spec: &AudioMapSpec, scope: Scope) -> Result<()> {
        audio::check_audio_homogeneity(&self.store)?;
        let tracks = audio::track_channels(&self.store)?;

        let layout_name = spec.layout.render(&mut self.store, &scope)?;
        let layout = ChannelLayout::from_name(&layout_name)
            .ok_or_else(|| Error::config(format!("unknown channel layout '{layout_name}'")))?;

        let mapping = match &spec.mapping {
            Some(mapping) => mapping.clone(),
            None => audio::default_mapping(&tracks, &layout),
        };
        let pan = audio::pan_parameter(&tracks, &layout, &mapping)?;

        debug!(operation = %spec.name, %layout, %pan, "audio mapping derived");
        self.store.set_dynamic(&spec.parameter, pan);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;
    use convforge_common::{ResourceId, SegmentId, SequenceId};

    fn pipeline(toml_src: &str) -> Pipeline {
        toml::from_str(toml_src).unwrap()
    }

    fn engine(dir: &std::path::Path, store: ContextStore) -> ConversionEngine {
        let env = ExecEnv::new(Workspace::new(dir, None).unwrap());
        ConversionEngine::new(store, env)
    }

    fn two_segments() -> ContextStore {
        let mut store = ContextStore::new();
        store.add_segment(SegmentId::new());
        store.add_segment(SegmentId::new());
        store
    }

    #[test]
    fn test_validate_rejects_unrecognized_kind() {
        let p = pipeline(
            r#"
            [[operations]]
            kind = "exec-once"
            name = "ok"
            template = "true"

            [[operations]]
            kind = "teleport"
            "#,
        );
        let err = validate(&p).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("operations[1]"));
    }

    #[test]
    fn test_validate_rejects_bad_template() {
        let p = pipeline(
            r#"
            [[operations]]
            kind = "exec-once"
            name = "broken"
            template = "ffmpeg %for i from=0 to=1% -i x"
            "#,
        );
        let err = validate(&p).unwrap_err();
        assert!(matches!(err.root_cause(), Error::Template { .. }));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_validate_rejects_pipe_without_tail() {
        let p = pipeline(
            r#"
            [[operations]]
            kind = "pipe"
            name = "headless"

            [[operations.cycles]]
            stages = [{ name = "a", template = "cat" }]
            "#,
        );
        assert!(matches!(validate(&p).unwrap_err(), Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_ambiguous_loop() {
        let p = pipeline(
            r#"
            [[operations]]
            kind = "for"
            var = "i"
            to = "3"
            count = "4"
            "#,
        );
        assert!(matches!(validate(&p).unwrap_err(), Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_self_referencing_loop_bounds() {
        let p = pipeline(
            r#"
            [[operations]]
            kind = "for"
            var = "i"
            from = "0"
            to = "%{dynamic.i}"
            "#,
        );
        let err = validate(&p).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("loop variable"), "{err}");

        let p = pipeline(
            r#"
            [[operations]]
            kind = "for"
            var = "r"
            from = "%{seq[r].start}"
            count = "2"
            "#,
        );
        assert!(matches!(validate(&p).unwrap_err(), Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_loop_variable() {
        for var in ["", "1st", "a b", "%{x}"] {
            let p = pipeline(&format!(
                "[[operations]]\nkind = \"for\"\nvar = \"{var}\"\ncount = \"1\"\n"
            ));
            assert!(
                matches!(validate(&p).unwrap_err(), Error::Config(_)),
                "{var:?} accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_loop_bounds_at_integer_limits() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), ContextStore::new());
        let p = pipeline(
            r#"
            [[operations]]
            kind = "for"
            var = "i"
            from = "-9223372036854775808"
            count = "0"

            [[operations.operations]]
            kind = "dynamic-parameter"
            name = "ran"
            value = "yes"
            "#,
        );
        engine.run(&p).await.unwrap();
        assert!(engine.store().dynamic_value("ran").is_none());
        assert!(engine.store().dynamic_value("i").is_none());

        let p = pipeline(
            r#"
            [[operations]]
            kind = "for"
            var = "i"
            from = "9223372036854775807"
            count = "2"
            "#,
        );
        let err = engine.run(&p).await.unwrap_err();
        assert!(matches!(err.root_cause(), Error::Template { .. }), "{err}");
        assert!(err.to_string().contains("overflows"), "{err}");
    }

    #[tokio::test]
    async fn test_unrecognized_kind_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), ContextStore::new());
        let p = pipeline(
            r#"
            [[operations]]
            kind = "dynamic-parameter"
            name = "x"
            value = "1"

            [[operations]]
            kind = "teleport"
            "#,
        );

        assert!(engine.run(&p).await.is_err());
        assert!(engine.store().dynamic_value("x").is_none());
    }

    #[tokio::test]
    async fn test_parameters_if_and_for() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), ContextStore::new());
        let p = pipeline(
            r#"
            [[operations]]
            kind = "dynamic-parameter"
            name = "hdr"
            value = "no"

            [[operations]]
            kind = "if"
            condition = "%{dynamic.hdr}"

            [[operations.then]]
            kind = "dynamic-parameter"
            name = "branch"
            value = "then"

            [[operations.else]]
            kind = "dynamic-parameter"
            name = "branch"
            value = "else"

            [[operations]]
            kind = "dynamic-parameter"
            name = "acc"
            value = ""

            [[operations]]
            kind = "for"
            var = "i"
            from = "1"
            to = "3"

            [[operations.operations]]
            kind = "dynamic-parameter"
            name = "acc"
            value = "%{dynamic.acc}%{dynamic.i}"
            "#,
        );

        engine.run(&p).await.unwrap();
        assert_eq!(engine.store().dynamic_value("branch"), Some("else"));
        assert_eq!(engine.store().dynamic_value("acc"), Some("123"));
        assert_eq!(engine.store().dynamic_value("i"), Some("3"));
    }

    #[tokio::test]
    async fn test_zero_count_loop_leaves_variable_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ContextStore::new();
        store.set_dynamic("i", "untouched");
        let mut engine = engine(dir.path(), store);
        let p = pipeline(
            r#"
            [[operations]]
            kind = "for"
            var = "i"
            count = "0"

            [[operations.operations]]
            kind = "dynamic-parameter"
            name = "ran"
            value = "yes"
            "#,
        );

        engine.run(&p).await.unwrap();
        assert_eq!(engine.store().dynamic_value("i"), Some("untouched"));
        assert!(engine.store().dynamic_value("ran").is_none());
    }

    #[tokio::test]
    async fn test_missing_parameter_names_operation() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), ContextStore::new());
        let p = pipeline(
            r#"
            name = "unit"

            [[operations]]
            kind = "exec-once"
            name = "encode"
            template = "ffmpeg -i %{dynamic.input}"
            "#,
        );

        let err = engine.run(&p).await.unwrap_err();
        assert!(matches!(err.root_cause(), Error::ParamNotFound { .. }));
        let msg = err.to_string();
        assert!(msg.contains("encode [unit]"), "{msg}");
    }

    #[tokio::test]
    async fn test_audio_map_sets_pan() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ContextStore::new();
        let segment = SegmentId::new();
        store.add_segment(segment);
        for _ in 0..2 {
            let seq = SequenceId::new();
            store.add_sequence(SequenceType::Audio, seq);
            let resource = ResourceId::new();
            store
                .add_resource(segment, SequenceType::Audio, seq, resource)
                .unwrap();
            store
                .add_parameter(
                    ContextKind::Sequence,
                    &Scope::global().with_sequence(SequenceType::Audio, seq),
                    "channels",
                    "2",
                    CleanupPolicy::Keep,
                )
                .unwrap();
        }

        let mut engine = engine(dir.path(), store);
        let p = pipeline(
            r#"
            [[operations]]
            kind = "audio-map"
            name = "map"
            layout = "quad"
            mapping = ["1:2", "1:1", "2:2", "silence"]
            parameter = "pan"
            "#,
        );

        engine.run(&p).await.unwrap();
        assert_eq!(
            engine.store().dynamic_value("pan"),
            Some("4c|c0=c1|c1=c0|c2=c3|c3=0*c0")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_each_segment_runs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), two_segments());
        let p = pipeline(
            r#"
            [[operations]]
            kind = "exec-each-segment"

            [[operations.operations]]
            kind = "exec-once"
            name = "mark"
            template = "sh -c \"printf %{segm.index} >> order.txt\""
            "#,
        );

        engine.run(&p).await.unwrap();
        let order = std::fs::read_to_string(dir.path().join("order.txt")).unwrap();
        assert_eq!(order, "01");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_cycles_per_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), two_segments());
        let p = pipeline(
            r#"
            [[operations]]
            kind = "pipe"
            name = "concat"

            [[operations.cycles]]
            each = "segment"
            stages = [{ name = "emit", template = "printf 'seg%{segm.index}\\n'" }]

            [[operations.tail]]
            name = "collect"
            template = "cat"
            output = "joined.txt"
            "#,
        );

        engine.run(&p).await.unwrap();
        let joined = std::fs::read_to_string(dir.path().join("joined.txt")).unwrap();
        assert_eq!(joined, "seg0\nseg1\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_stops_run_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("partial.tmp"), "x").unwrap();
        let mut engine = engine(dir.path(), ContextStore::new());
        let p = pipeline(
            r#"
            [[operations]]
            kind = "dynamic-parameter"
            name = "partial"
            value = "partial.tmp"
            context = "tmp"
            cleanup = "delete-on-fail"

            [[operations]]
            kind = "exec-once"
            name = "fail"
            template = "sh -c \"exit 4\""

            [[operations]]
            kind = "exec-once"
            name = "never"
            template = "touch never.txt"
            "#,
        );

        let err = engine.run(&p).await.unwrap_err();
        assert!(matches!(err.root_cause(), Error::ProcessFailed { .. }));
        assert!(!dir.path().join("never.txt").exists());
        assert!(!dir.path().join("partial.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_skipped_pipe_stages_leave_the_rest_intact() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), ContextStore::new());
        let p = pipeline(
            r#"
            [[operations]]
            kind = "pipe"
            name = "partial"

            # Every stage skipped: the whole group is dropped.
            [[operations.cycles]]
            stages = [
                { name = "gone", template = "printf zzz", when = "false" },
            ]

            [[operations.cycles]]
            stages = [
                { name = "first", template = "printf abc" },
                { name = "shout", template = "tr a-z A-Z", when = "false" },
            ]

            [[operations.cycles]]
            stages = [{ name = "second", template = "printf def" }]

            [[operations.tail]]
            name = "head"
            template = "cat"

            [[operations.tail]]
            name = "mangle"
            template = "tr a-z X"
            when = "false"

            [[operations.tail]]
            name = "collect"
            template = "cat"
            output = "out.txt"
            "#,
        );

        engine.run(&p).await.unwrap();
        let out = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(out, "abcdef");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_guard_skips_exec() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ContextStore::new();
        store.set_dynamic("enabled", "off");
        let mut engine = engine(dir.path(), store);
        let p = pipeline(
            r#"
            [[operations]]
            kind = "exec-once"
            name = "maybe"
            template = "touch made.txt"
            when = "%{dynamic.enabled}"
            "#,
        );

        engine.run(&p).await.unwrap();
        assert!(!dir.path().join("made.txt").exists());
    }
}
