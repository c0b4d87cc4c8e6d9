use failure::{Error, Fail};

use super::parse::{BinOp, Function, Node, Program};

#[derive(Fail, Debug)]
#[fail(display = "Codegen Error: {}", _0)]
pub struct CodegenError(pub String);

/// Integer argument registers of the x86-64 calling convention, in
/// left-to-right parameter order.
const ARG_REG: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// Emit one labeled assembly block per function. The directive block at
/// the top of the output is owned by the driver, not by the generator.
pub fn generate(program: &Program) -> Result<String, Error> {
    let mut generator = Generator::new();

    for func in program {
        generator.function(func)?;
    }

    Ok(generator.out)
}

/// Stack-discipline emitter: every expression leaves exactly one word on
/// the hardware stack, every statement leaves it untouched. `seq` numbers
/// control-flow labels and only ever grows, so nested and repeated
/// `if`/`while`/`for` sites never collide.
struct Generator {
    out: String,
    seq: usize,
}

impl Generator {
    fn new() -> Self {
        Generator {
            out: String::new(),
            seq: 0,
        }
    }

    fn emit(&mut self, line: &str) {
        self.out.push_str("  ");
        self.out.push_str(line);
        self.out.push('\n');
    }

    fn label(&mut self, name: &str) {
        self.out.push_str(name);
        self.out.push_str(":\n");
    }

    fn new_seq(&mut self) -> usize {
        self.seq += 1;
        self.seq
    }

    fn function(&mut self, func: &Function) -> Result<(), Error> {
        if func.params.len() > ARG_REG.len() {
            return Err(CodegenError(format!(
                "function '{}' takes more than {} parameters",
                func.name,
                ARG_REG.len()
            ))
            .into());
        }

        self.label(&func.name);
        self.emit("push rbp");
        self.emit("mov rbp, rsp");
        self.emit(&format!("sub rsp, {}", frame_size(func.locals.len())));

        for (i, param) in func.params.iter().enumerate() {
            self.emit(&format!("mov [rbp-{}], {}", param.offset, ARG_REG[i]));
        }

        for node in &func.body {
            self.stmt(node)?;
        }

        // falling off the end: rax still holds the last expression
        // statement's value
        self.emit("mov rsp, rbp");
        self.emit("pop rbp");
        self.emit("ret");
        Ok(())
    }

    fn stmt(&mut self, node: &Node) -> Result<(), Error> {
        match node {
            Node::Return(operand) => {
                self.expr(operand)?;
                self.emit("pop rax");
                self.emit("mov rsp, rbp");
                self.emit("pop rbp");
                self.emit("ret");
            }
            Node::If { cond, then, els } => {
                let seq = self.new_seq();
                self.expr(cond)?;
                self.emit("pop rax");
                self.emit("cmp rax, 0");
                match els {
                    Some(els) => {
                        self.emit(&format!("je .Lelse{}", seq));
                        self.stmt(then)?;
                        self.emit(&format!("jmp .Lend{}", seq));
                        self.label(&format!(".Lelse{}", seq));
                        self.stmt(els)?;
                    }
                    None => {
                        self.emit(&format!("je .Lend{}", seq));
                        self.stmt(then)?;
                    }
                }
                self.label(&format!(".Lend{}", seq));
            }
            Node::While { cond, body } => {
                let seq = self.new_seq();
                self.label(&format!(".Lbegin{}", seq));
                self.expr(cond)?;
                self.emit("pop rax");
                self.emit("cmp rax, 0");
                self.emit(&format!("je .Lend{}", seq));
                self.stmt(body)?;
                self.emit(&format!("jmp .Lbegin{}", seq));
                self.label(&format!(".Lend{}", seq));
            }
            Node::For {
                init,
                cond,
                inc,
                body,
            } => {
                let seq = self.new_seq();
                if let Some(init) = init {
                    self.expr(init)?;
                    self.emit("pop rax");
                }
                self.label(&format!(".Lbegin{}", seq));
                // an omitted condition is always true
                if let Some(cond) = cond {
                    self.expr(cond)?;
                    self.emit("pop rax");
                    self.emit("cmp rax, 0");
                    self.emit(&format!("je .Lend{}", seq));
                }
                self.stmt(body)?;
                if let Some(inc) = inc {
                    self.expr(inc)?;
                    self.emit("pop rax");
                }
                self.emit(&format!("jmp .Lbegin{}", seq));
                self.label(&format!(".Lend{}", seq));
            }
            Node::Block(stmts) => {
                for node in stmts {
                    self.stmt(node)?;
                }
            }
            _ => {
                // expression statement: evaluate and discard
                self.expr(node)?;
                self.emit("pop rax");
            }
        }
        Ok(())
    }

    fn expr(&mut self, node: &Node) -> Result<(), Error> {
        match node {
            Node::Num(val) => {
                self.emit(&format!("push {}", val));
            }
            Node::Var(..) => {
                self.addr(node)?;
                self.load();
            }
            Node::Addr(operand) => {
                self.addr(operand)?;
            }
            Node::Deref(operand) => {
                self.expr(operand)?;
                self.load();
            }
            Node::Assign(lhs, rhs) => {
                self.addr(lhs)?;
                self.expr(rhs)?;
                self.store();
            }
            Node::Bin(op, lhs, rhs) => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit("pop rdi");
                self.emit("pop rax");
                match op {
                    BinOp::Add => self.emit("add rax, rdi"),
                    BinOp::Sub => self.emit("sub rax, rdi"),
                    BinOp::Mul => self.emit("imul rax, rdi"),
                    BinOp::Div => {
                        self.emit("cqo");
                        self.emit("idiv rdi");
                    }
                    BinOp::Eq => self.cmp("sete"),
                    BinOp::Ne => self.cmp("setne"),
                    BinOp::Lt => self.cmp("setl"),
                    BinOp::Le => self.cmp("setle"),
                }
                self.emit("push rax");
            }
            Node::Call(name, args) => {
                if args.len() > ARG_REG.len() {
                    return Err(CodegenError(format!(
                        "call to '{}' passes more than {} arguments",
                        name,
                        ARG_REG.len()
                    ))
                    .into());
                }

                for arg in args {
                    self.expr(arg)?;
                }
                // the last-pushed argument pops into the last parameter
                // register, draining everything pushed above
                for i in (0..args.len()).rev() {
                    self.emit(&format!("pop {}", ARG_REG[i]));
                }
                self.emit(&format!("call {}", name));
                self.emit("push rax");
            }
            _ => {
                return Err(CodegenError(
                    "statement form used where an expression is required".to_owned(),
                )
                .into());
            }
        }
        Ok(())
    }

    /// Push the address of an addressable operand: a variable slot or the
    /// target of a dereference. Anything else cannot stand on the left of
    /// an assignment or under `&`.
    fn addr(&mut self, node: &Node) -> Result<(), Error> {
        match node {
            Node::Var(var) => {
                self.emit("mov rax, rbp");
                self.emit(&format!("sub rax, {}", var.offset));
                self.emit("push rax");
                Ok(())
            }
            Node::Deref(operand) => self.expr(operand),
            _ => Err(CodegenError("not an addressable expression".to_owned()).into()),
        }
    }

    fn load(&mut self) {
        self.emit("pop rax");
        self.emit("mov rax, [rax]");
        self.emit("push rax");
    }

    fn store(&mut self) {
        self.emit("pop rdi");
        self.emit("pop rax");
        self.emit("mov [rax], rdi");
        self.emit("push rdi");
    }

    fn cmp(&mut self, set: &str) {
        self.emit("cmp rax, rdi");
        self.emit(&format!("{} al", set));
        self.emit("movzb rax, al");
    }
}

fn frame_size(locals: usize) -> usize {
    // one 8-byte slot per variable, frame kept 16-byte aligned
    (locals * 8 + 15) / 16 * 16
}
