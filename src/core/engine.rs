//! XSLT engine integration.
//!
//! [`XsltEngine::compile`] checks a stylesheet once and produces a
//! [`CompiledTemplate`], a thread-safe handle that can sit in the shared cache.
//! The xrust tree types are reference counted and stay on the thread that
//! built them, so the executable program behind a template is materialized per
//! worker thread and memoized there by stylesheet fingerprint.
//!
//! Top-level `xsl:param` declarations are compiled into stylesheet variables
//! that pick either the declared default or a value bound at run time, so one
//! program serves every parameter value. Each run works on a clone of the
//! memoized program, so no state leaks from one message to the next.
use std::{borrow::Cow, cell::RefCell, collections::HashMap, rc::Rc, sync::Arc};

use quick_xml::{
    NsReader, Reader, Writer,
    events::{BytesEnd, BytesStart, BytesText, Event},
    name::{Namespace, ResolveResult},
};
use xrust::{
    item::{Item, Node, Sequence},
    parser::xml::parse as parse_xml,
    transform::context::{Context, StaticContextBuilder},
    trees::smite::RNode,
    value::Value,
    xdmerror::{Error as XrustError, ErrorKind},
    xslt::from_document,
};

use crate::{
    config::OutputConfig,
    core::{
        cache::{Fingerprint, StylesheetSource},
        error::{CompileError, SecurityViolation, TransformError},
        secure_source::{PrologError, SecureSourceBuilder},
    },
};

const XSLT_NAMESPACE: &[u8] = b"http://www.w3.org/1999/XSL/Transform";

/// Error text used by every blocked fetch, so blocked access can be told apart from other failures.
const EXTERNAL_ACCESS_DISABLED: &str = "external resource access is disabled";

/// Programs kept per worker thread before the memo is reset.
const MAX_PROGRAMS_PER_THREAD: usize = 64;

// Variables generated for the parameter at position N: whether a value was
// bound, the bound value and the declared default.
const BOUND_PREFIX: &str = "axon_xslt_bound_";
const VALUE_PREFIX: &str = "axon_xslt_value_";
const DEFAULT_PREFIX: &str = "axon_xslt_default_";

thread_local! {
    static PROGRAMS: RefCell<HashMap<Fingerprint, Context<RNode>>> = RefCell::new(HashMap::new());
}

/// Serialization settings fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSettings {
    pub indent: bool,
    pub indent_width: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self::from(&OutputConfig::default())
    }
}

impl From<&OutputConfig> for OutputSettings {
    fn from(config: &OutputConfig) -> Self {
        Self {
            indent: config.indent,
            indent_width: config.indent_width,
        }
    }
}

/// A stylesheet that passed compilation.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    source: StylesheetSource,
    /// Stylesheet text with parameter declarations compiled into variables
    program_text: Arc<str>,
    declared_parameters: Vec<String>,
    output: OutputSettings,
}

impl CompiledTemplate {
    pub fn fingerprint(&self) -> Fingerprint {
        self.source.fingerprint()
    }

    pub fn source(&self) -> &StylesheetSource {
        &self.source
    }

    /// Names of the top-level `xsl:param` declarations, in document order.
    pub fn declared_parameters(&self) -> &[String] {
        &self.declared_parameters
    }

    pub fn declares(&self, name: &str) -> bool {
        self.declared_parameters.iter().any(|declared| declared == name)
    }

    pub fn output(&self) -> OutputSettings {
        self.output
    }
}

/// Serialized result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformation {
    pub output: String,
    /// The worker thread had no program for the stylesheet and built one.
    pub program_built: bool,
}

/// Compiles stylesheets and runs them against documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XsltEngine {
    secure: SecureSourceBuilder,
    output: OutputSettings,
}

impl XsltEngine {
    pub fn new(secure: SecureSourceBuilder, output: OutputSettings) -> Self {
        Self { secure, output }
    }

    pub fn secure_sources(&self) -> &SecureSourceBuilder {
        &self.secure
    }

    /// Check and compile a stylesheet.
    pub fn compile(&self, source: StylesheetSource) -> Result<CompiledTemplate, CompileError> {
        let declared_parameters = scan_stylesheet(source.text())?;
        let program_text: Arc<str> = Arc::from(declare_parameters(source.text())?);
        let program = self.build_program(&program_text)?;

        PROGRAMS.with(|programs| {
            remember(&mut programs.borrow_mut(), source.fingerprint(), program);
        });

        Ok(CompiledTemplate {
            source,
            program_text,
            declared_parameters,
            output: self.output,
        })
    }

    /// Run `template` against `input`.
    ///
    /// `bindings` holds the already normalized parameters; names the
    /// stylesheet does not declare are ignored.
    pub fn transform(
        &self,
        template: &CompiledTemplate,
        bindings: &[(String, String)],
        input: &str,
    ) -> Result<Transformation, TransformError> {
        let fingerprint = template.fingerprint();

        let (output, program_built) =
            PROGRAMS.with(|programs| -> Result<(String, bool), TransformError> {
                let mut programs = programs.borrow_mut();
                let program_built = !programs.contains_key(&fingerprint);
                if program_built {
                    let program = self.build_program(&template.program_text)?;
                    remember(&mut programs, fingerprint, program);
                }

                let source = self.secure.build(input).map_err(|e| match e {
                    PrologError::Violation(violation) => TransformError::Security(violation),
                    PrologError::Malformed(message) => TransformError::MalformedInput(message),
                })?;
                let document = source.parse().map_err(TransformError::MalformedInput)?;

                let mut program = programs
                    .get(&fingerprint)
                    .cloned()
                    .ok_or_else(|| {
                        TransformError::Execution("stylesheet program was not materialized".to_string())
                    })?;
                bind_parameters(&mut program, template.declared_parameters(), bindings);
                Ok((run(program, document)?, program_built))
            })?;

        Ok(Transformation {
            output: serialize(template.output(), output)?,
            program_built,
        })
    }

    fn build_program(&self, text: &str) -> Result<Context<RNode>, CompileError> {
        let secure = self.secure;
        let style = secure.build(text).map_err(|e| match e {
            PrologError::Violation(violation) => CompileError::Rejected(violation),
            PrologError::Malformed(message) => CompileError::Malformed(message),
        })?;
        let style = style.parse().map_err(CompileError::Malformed)?;

        from_document(
            style,
            None,
            move |included: &str| {
                let source = secure
                    .build(included)
                    .map_err(|_| XrustError::new(ErrorKind::NotImplemented, EXTERNAL_ACCESS_DISABLED))?;
                let doc = RNode::new_document();
                parse_xml(doc.clone(), source.as_str(), None)?;
                Ok(doc)
            },
            |_| Err(XrustError::new(ErrorKind::NotImplemented, EXTERNAL_ACCESS_DISABLED)),
        )
        .map_err(|e| {
            let message = e.to_string();
            if message.contains(EXTERNAL_ACCESS_DISABLED) {
                CompileError::Rejected(SecurityViolation::ExternalResource(message))
            } else {
                CompileError::Malformed(message)
            }
        })
    }
}

fn remember(
    programs: &mut HashMap<Fingerprint, Context<RNode>>,
    fingerprint: Fingerprint,
    program: Context<RNode>,
) {
    if programs.len() >= MAX_PROGRAMS_PER_THREAD && !programs.contains_key(&fingerprint) {
        programs.clear();
    }
    programs.insert(fingerprint, program);
}

fn value_sequence(value: Value) -> Sequence<RNode> {
    vec![Item::Value(Rc::new(value))]
}

/// Supply the run-time variables every compiled parameter declaration reads.
fn bind_parameters(
    program: &mut Context<RNode>,
    declared: &[String],
    bindings: &[(String, String)],
) {
    for (index, name) in declared.iter().enumerate() {
        let bound = bindings.iter().rev().find(|(bound_name, _)| bound_name == name);
        program.var_push(
            format!("{BOUND_PREFIX}{index}"),
            value_sequence(Value::from(bound.is_some())),
        );
        program.var_push(
            format!("{VALUE_PREFIX}{index}"),
            value_sequence(Value::from(bound.map_or("", |(_, value)| value.as_str()))),
        );
    }
}

fn run(mut program: Context<RNode>, document: RNode) -> Result<String, TransformError> {
    program.context(vec![Item::Node(document)], 0);
    let result = RNode::new_document();
    program.result_document(result.clone());

    let mut static_context = StaticContextBuilder::new()
        .message(|_| Ok(()))
        .fetcher(|_| Err(XrustError::new(ErrorKind::NotImplemented, EXTERNAL_ACCESS_DISABLED)))
        .parser(|_| Err(XrustError::new(ErrorKind::NotImplemented, EXTERNAL_ACCESS_DISABLED)))
        .build();

    program.evaluate(&mut static_context).map_err(|e| {
        let message = e.to_string();
        if message.contains(EXTERNAL_ACCESS_DISABLED) {
            TransformError::Security(SecurityViolation::ExternalResource(message))
        } else {
            TransformError::Execution(message)
        }
    })?;

    Ok(result.to_xml())
}

fn is_xslt(resolved: &ResolveResult<'_>, local_name: &[u8], expected: &[&[u8]]) -> bool {
    matches!(resolved, ResolveResult::Bound(Namespace(ns)) if *ns == XSLT_NAMESPACE)
        && expected.contains(&local_name)
}

fn malformed(e: impl std::fmt::Display) -> CompileError {
    CompileError::Malformed(e.to_string())
}

fn param_name(element: &BytesStart<'_>) -> Result<Option<String>, CompileError> {
    let attribute = element.try_get_attribute("name").map_err(malformed)?;
    attribute
        .map(|attribute| {
            attribute
                .unescape_value()
                .map(|value| value.trim().to_string())
                .map_err(malformed)
        })
        .transpose()
        .map(|name| name.filter(|name| !name.is_empty()))
}

/// Check well-formedness and the root element, and collect the top-level parameter names.
fn scan_stylesheet(text: &str) -> Result<Vec<String>, CompileError> {
    let mut reader = NsReader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut depth = 0usize;
    let mut seen_root = false;
    let mut parameters = Vec::new();

    loop {
        let (resolved, event) = reader.read_resolved_event().map_err(malformed)?;
        let (element, is_empty) = match &event {
            Event::Start(element) => (element, false),
            Event::Empty(element) => (element, true),
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        let local_name = element.local_name();
        if depth == 0 {
            if seen_root || !is_xslt(&resolved, local_name.as_ref(), &[b"stylesheet", b"transform"]) {
                return Err(CompileError::NotAStylesheet(
                    String::from_utf8_lossy(element.name().as_ref()).into_owned(),
                ));
            }
            seen_root = true;
        } else if depth == 1
            && is_xslt(&resolved, local_name.as_ref(), &[b"param"])
            && let Some(name) = param_name(element)?
        {
            parameters.push(name);
        }

        if !is_empty {
            depth += 1;
        }
    }

    if !seen_root {
        return Err(CompileError::Malformed("stylesheet has no root element".to_string()));
    }
    Ok(parameters)
}

/// `variable` under the same prefix as `param`.
fn variable_tag(param: &BytesStart<'_>) -> String {
    match param.name().prefix() {
        Some(prefix) => format!("{}:variable", String::from_utf8_lossy(prefix.as_ref())),
        None => "variable".to_string(),
    }
}

/// The declared default of parameter `index`, keeping its `select` or content.
fn default_declaration(param: &BytesStart<'_>, index: usize) -> Result<BytesStart<'static>, CompileError> {
    let mut declaration = BytesStart::new(variable_tag(param));
    declaration.push_attribute(("name", format!("{DEFAULT_PREFIX}{index}").as_str()));
    if let Some(select) = param.try_get_attribute("select").map_err(malformed)? {
        declaration.push_attribute(select);
    }
    Ok(declaration)
}

/// The variable the stylesheet reads under the parameter's own name.
fn selector_declaration(param: &BytesStart<'_>, name: &str, index: usize) -> BytesStart<'static> {
    let mut declaration = BytesStart::new(variable_tag(param));
    declaration.push_attribute(("name", name));
    declaration.push_attribute((
        "select",
        format!(
            "if (${BOUND_PREFIX}{index}) then ${VALUE_PREFIX}{index} else ${DEFAULT_PREFIX}{index}"
        )
        .as_str(),
    ));
    declaration
}

/// Compile every named top-level `xsl:param` into a default variable and a selector variable.
fn declare_parameters(text: &str) -> Result<Cow<'_, str>, CompileError> {
    let mut reader = NsReader::from_str(text);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(text.len()));
    let mut depth = 0usize;
    let mut index = 0usize;
    // Open default declaration: its depth, closing tag and the selector owed after it
    let mut pending: Option<(usize, String, BytesStart<'static>)> = None;

    loop {
        let (resolved, event) = reader.read_resolved_event().map_err(malformed)?;
        let param = match &event {
            Event::Start(element) | Event::Empty(element)
                if depth == 1 && is_xslt(&resolved, element.local_name().as_ref(), &[b"param"]) =>
            {
                match param_name(element)? {
                    Some(name) => Some((
                        default_declaration(element, index)?,
                        selector_declaration(element, &name, index),
                        variable_tag(element),
                    )),
                    None => None,
                }
            }
            _ => None,
        };

        match (param, event) {
            (Some((default, selector, tag)), Event::Start(_)) => {
                writer.write_event(Event::Start(default)).map_err(malformed)?;
                pending = Some((depth, tag, selector));
                depth += 1;
                index += 1;
            }
            (Some((default, selector, _)), _) => {
                writer.write_event(Event::Empty(default)).map_err(malformed)?;
                writer.write_event(Event::Empty(selector)).map_err(malformed)?;
                index += 1;
            }
            (None, Event::Eof) => break,
            (None, Event::End(end)) => {
                depth = depth.saturating_sub(1);
                match pending.take_if(|(open_depth, _, _)| *open_depth == depth) {
                    Some((_, tag, selector)) => {
                        writer
                            .write_event(Event::End(BytesEnd::new(tag)))
                            .map_err(malformed)?;
                        writer.write_event(Event::Empty(selector)).map_err(malformed)?;
                    }
                    None => writer.write_event(Event::End(end)).map_err(malformed)?,
                }
            }
            (None, event) => {
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
                writer.write_event(event).map_err(malformed)?;
            }
        }
    }

    if index == 0 {
        return Ok(Cow::Borrowed(text));
    }
    String::from_utf8(writer.into_inner())
        .map(Cow::Owned)
        .map_err(malformed)
}

fn serialize(settings: OutputSettings, output: String) -> Result<String, TransformError> {
    if !settings.indent {
        return Ok(output);
    }
    Ok(reindent(&output, settings.indent_width)?.unwrap_or(output))
}

/// Mark every start tag whose direct content includes text.
///
/// Whitespace-only text counts: in a transformation result it was produced on
/// purpose, so it is significant.
fn mixed_content(events: &[Event<'_>]) -> Vec<bool> {
    let mut mixed = vec![false; events.len()];
    let mut open = Vec::new();
    for (position, event) in events.iter().enumerate() {
        match event {
            Event::Start(_) => open.push(position),
            Event::End(_) => {
                open.pop();
            }
            Event::Text(_) | Event::CData(_) => {
                if let Some(&parent) = open.last() {
                    mixed[parent] = true;
                }
            }
            _ => {}
        }
    }
    mixed
}

/// Pretty-print markup. Returns `None` when the output is not markup (e.g. text method output).
///
/// Only element-only content is indented; an element holding text is written
/// exactly as produced, descendants included.
fn reindent(markup: &str, width: usize) -> Result<Option<String>, TransformError> {
    let mut reader = Reader::from_str(markup);
    reader.config_mut().trim_text(false);
    let mut events = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => events.push(event),
            Err(_) => return Ok(None),
        }
    }
    let mixed = mixed_content(&events);

    let mut writer = Writer::new(Vec::with_capacity(markup.len() + markup.len() / 4));
    let mut write = |event: Event<'_>| {
        writer
            .write_event(event)
            .map_err(|e| TransformError::Serialization(e.to_string()))
    };
    let newline = |depth: usize| {
        Event::Text(BytesText::from_escaped(format!("\n{}", " ".repeat(depth * width))))
    };

    let mut depth = 0usize;
    // Depth at which the outermost open mixed-content element started
    let mut verbatim: Option<usize> = None;
    let mut wrote_any = false;
    let mut after_start = false;

    for (position, event) in events.into_iter().enumerate() {
        if let Some(verbatim_depth) = verbatim {
            match &event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if depth == verbatim_depth {
                        verbatim = None;
                    }
                }
                _ => {}
            }
            write(event)?;
            after_start = false;
            continue;
        }

        match event {
            Event::Text(ref text) if text.iter().all(u8::is_ascii_whitespace) => continue,
            Event::Text(_) | Event::CData(_) => {
                write(event)?;
                after_start = false;
            }
            Event::Start(_) => {
                if wrote_any {
                    write(newline(depth))?;
                }
                write(event)?;
                if mixed[position] {
                    verbatim = Some(depth);
                }
                depth += 1;
                after_start = true;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if !after_start {
                    write(newline(depth))?;
                }
                write(event)?;
                after_start = false;
            }
            event => {
                if wrote_any {
                    write(newline(depth))?;
                }
                write(event)?;
                after_start = false;
            }
        }
        wrote_any = true;
    }

    String::from_utf8(writer.into_inner())
        .map(Some)
        .map_err(|e| TransformError::Serialization(e.to_string()))
}
