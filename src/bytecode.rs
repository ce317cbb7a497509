use std::fmt;
use std::rc::Rc;

use crate::runtime::value::format_number;
use crate::source::SourceRef;
use crate::token::Span;

/// Stack-machine instruction set. Jump operands are signed offsets relative
/// to the instruction pointer after it has advanced past the jump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// Push `consts[k]`.
    Const(usize),
    /// Push the value bound to `names[k]`; unbound is a NameError.
    Load(usize),
    /// Pop and bind to `names[k]` using the assignment scoping rule.
    Store(usize),
    Pop,
    Neg,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Jump(isize),
    /// Pop the condition; jump when falsy.
    JumpIfFalse(isize),
    /// Short-circuit `and`: jump when falsy, leaving the operand in place.
    JumpIfFalseKeep(isize),
    /// Short-circuit `or`: jump when truthy, leaving the operand in place.
    JumpIfTrueKeep(isize),
    /// Pop n arguments and the callee beneath them; push the result.
    Call(usize),
    /// Pop the return value and unwind the current frame.
    Return,
    /// Pop n elements; push them as a fresh list.
    BuildList(usize),
    /// Pop index and target; push the element.
    Index,
    /// Close over the current environment using descriptor `consts[k]`.
    MakeFunc(usize),
    /// Import the path at string constant `consts[k]`.
    Import(usize),
}

impl Op {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Const(_) => "CONST",
            Op::Load(_) => "LOAD",
            Op::Store(_) => "STORE",
            Op::Pop => "POP",
            Op::Neg => "NEG",
            Op::Not => "NOT",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Eq => "EQ",
            Op::NotEq => "NE",
            Op::Less => "LT",
            Op::LessEq => "LE",
            Op::Greater => "GT",
            Op::GreaterEq => "GE",
            Op::Jump(_) => "JUMP",
            Op::JumpIfFalse(_) => "JUMP_IF_FALSE",
            Op::JumpIfFalseKeep(_) => "JUMP_IF_FALSE_KEEP",
            Op::JumpIfTrueKeep(_) => "JUMP_IF_TRUE_KEEP",
            Op::Call(_) => "CALL",
            Op::Return => "RETURN",
            Op::BuildList(_) => "BUILD_LIST",
            Op::Index => "INDEX",
            Op::MakeFunc(_) => "MAKE_FUNC",
            Op::Import(_) => "IMPORT",
        }
    }
}

/// Literal pool entry. Function bodies are nested chunks stored as
/// descriptors and instantiated at run time by `MakeFunc`.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
    Func(Rc<FuncProto>),
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Number(value) => f.write_str(&format_number(*value)),
            Const::Str(value) => write!(f, "{value:?}"),
            Const::Bool(true) => f.write_str("true"),
            Const::Bool(false) => f.write_str("false"),
            Const::Nil => f.write_str("nil"),
            Const::Func(proto) => write!(f, "{}", proto.chunk.name),
        }
    }
}

/// Compile-time description of a function: pairing it with an environment at
/// run time produces a closure value.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncProto {
    pub name: String,
    pub params: Vec<String>,
    pub chunk: Rc<Chunk>,
}

/// A self-contained bytecode unit: code, a constant pool, the identifier
/// names referenced by Load/Store, and a span table parallel to `code` for
/// stack traces.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub name: String,
    pub source: SourceRef,
    pub code: Vec<Op>,
    pub spans: Vec<Span>,
    pub consts: Vec<Const>,
    pub names: Vec<String>,
}

impl Chunk {
    pub fn new(name: impl Into<String>, source: SourceRef) -> Self {
        Self {
            name: name.into(),
            source,
            code: Vec::new(),
            spans: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
        }
    }

    /// Appends an instruction and its source span; returns its offset.
    pub fn emit(&mut self, op: Op, span: Span) -> usize {
        self.code.push(op);
        self.spans.push(span);
        self.code.len() - 1
    }

    pub fn add_const(&mut self, value: Const) -> usize {
        self.consts.push(value);
        self.consts.len() - 1
    }

    /// Interns an identifier for Load/Store operands.
    pub fn add_name(&mut self, name: &str) -> usize {
        if let Some(index) = self.names.iter().position(|existing| existing == name) {
            return index;
        }
        self.names.push(name.to_string());
        self.names.len() - 1
    }

    /// Points the forward jump at `offset` to the next instruction to be
    /// emitted.
    pub fn patch_jump_to_here(&mut self, offset: usize) {
        let target = self.code.len() as isize - (offset as isize + 1);
        match &mut self.code[offset] {
            Op::Jump(slot)
            | Op::JumpIfFalse(slot)
            | Op::JumpIfFalseKeep(slot)
            | Op::JumpIfTrueKeep(slot) => *slot = target,
            other => unreachable!("patching non-jump instruction {other:?}"),
        }
    }

    /// Relative offset from the next emitted instruction back to
    /// `loop_start`.
    pub fn loop_offset(&self, loop_start: usize) -> isize {
        loop_start as isize - (self.code.len() as isize + 1)
    }
}

/// Renders a chunk (and, recursively, every function chunk in its constant
/// pool) one instruction per line:
/// `<offset>  <line>  <opcode>  <operand>  ; <resolved comment>`.
pub fn disassemble(chunk: &Chunk) -> String {
    let mut out = Vec::new();
    disassemble_into(chunk, &mut out);
    out.join("\n")
}

fn disassemble_into(chunk: &Chunk, out: &mut Vec<String>) {
    out.push(format!("== {} ==", chunk.name));
    for (offset, op) in chunk.code.iter().enumerate() {
        let line = chunk.spans.get(offset).map(|span| span.line).unwrap_or(0);
        let mut rendered = format!("{offset:04}  {line:>4}  {:<18}", op.mnemonic());
        match op {
            Op::Const(k) | Op::MakeFunc(k) | Op::Import(k) => {
                rendered.push_str(&format!(" {k:<4} ; {}", chunk.consts[*k]));
            }
            Op::Load(k) | Op::Store(k) => {
                rendered.push_str(&format!(" {k:<4} ; {}", chunk.names[*k]));
            }
            Op::Call(argc) | Op::BuildList(argc) => {
                rendered.push_str(&format!(" {argc}"));
            }
            Op::Jump(target)
            | Op::JumpIfFalse(target)
            | Op::JumpIfFalseKeep(target)
            | Op::JumpIfTrueKeep(target) => {
                let dest = offset as isize + 1 + target;
                rendered.push_str(&format!(" {target:<4} ; -> {dest:04}"));
            }
            _ => {}
        }
        out.push(rendered.trim_end().to_string());
    }
    for constant in &chunk.consts {
        if let Const::Func(proto) = constant {
            out.push(String::new());
            disassemble_into(&proto.chunk, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    fn chunk() -> Chunk {
        Chunk::new("<script>", Source::new("test.raf", ""))
    }

    #[test]
    fn add_name_interns_duplicates() {
        let mut chunk = chunk();
        let first = chunk.add_name("x");
        let second = chunk.add_name("y");
        let again = chunk.add_name("x");
        assert_eq!((first, second, again), (0, 1, 0));
        assert_eq!(chunk.names, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn patch_jump_targets_the_next_instruction() {
        let mut chunk = chunk();
        let jump = chunk.emit(Op::JumpIfFalse(0), Span::default());
        chunk.emit(Op::Pop, Span::default());
        chunk.emit(Op::Pop, Span::default());
        chunk.patch_jump_to_here(jump);
        assert_eq!(chunk.code[jump], Op::JumpIfFalse(2));
    }

    #[test]
    fn loop_offset_jumps_back_to_the_start() {
        let mut chunk = chunk();
        let start = chunk.code.len();
        chunk.emit(Op::Pop, Span::default());
        chunk.emit(Op::Pop, Span::default());
        // After emitting the jump at offset 2, ip will be 3; 3 + (-3) = 0.
        assert_eq!(chunk.loop_offset(start), -3);
    }

    #[test]
    fn disassembly_resolves_pool_and_name_indices() {
        let mut chunk = chunk();
        let k = chunk.add_const(Const::Number(3.0));
        let name = chunk.add_name("x");
        chunk.emit(Op::Const(k), Span::new(1, 5));
        chunk.emit(Op::Store(name), Span::new(1, 1));
        chunk.emit(Op::Return, Span::new(1, 1));

        let listing = disassemble(&chunk);
        let lines = listing
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(lines[0], vec!["==", "<script>", "=="]);
        assert_eq!(lines[1], vec!["0000", "1", "CONST", "0", ";", "3"]);
        assert_eq!(lines[2], vec!["0001", "1", "STORE", "0", ";", "x"]);
        assert_eq!(lines[3], vec!["0002", "1", "RETURN"]);
    }

    #[test]
    fn disassembly_includes_nested_function_chunks() {
        let source = Source::new("test.raf", "");
        let mut inner = Chunk::new("<fn f>", source.clone());
        inner.emit(Op::Return, Span::default());

        let mut outer = Chunk::new("<script>", source);
        let proto = outer.add_const(Const::Func(Rc::new(FuncProto {
            name: "f".to_string(),
            params: vec![],
            chunk: Rc::new(inner),
        })));
        outer.emit(Op::MakeFunc(proto), Span::default());

        let listing = disassemble(&outer);
        assert!(listing.contains("== <script> =="));
        assert!(listing.contains("MAKE_FUNC"));
        assert!(listing.contains("== <fn f> =="));
    }
}
