use std::mem;
use std::rc::Rc;

use failure::{Error, Fail};

use super::token::{OpType, Token, Tokens};

#[derive(Fail, Debug)]
#[fail(display = "Parse Error: {}, pos: {}", _0, _1)]
pub struct ParseError(pub String, pub usize);

/// parser syntax
///
/// program: function*
///
/// function: ident "(" (ident ("," ident)*)? ")" "{" stmt* "}"
///
/// stmt: "return" expr ";"
/// stmt: "if" "(" expr ")" stmt ("else" stmt)?
/// stmt: "while" "(" expr ")" stmt
/// stmt: "for" "(" expr? ";" expr? ";" expr? ")" stmt
/// stmt: "{" stmt* "}"
/// stmt: expr ";"
///
/// expr: assign
///
/// assign: equality ("=" assign)?
///
/// equality: relational (("==" | "!=") relational)*
///
/// relational: add (("<" | "<=" | ">" | ">=") add)*
///
/// add: mul (("+" | "-") mul)*
///
/// mul: unary (("*" | "/") unary)*
///
/// unary: ("+" | "-" | "&" | "*") unary
/// unary: primary
///
/// primary: "(" expr ")"
/// primary: ident "(" (assign ("," assign)*)? ")"
/// primary: ident
/// primary: num
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
}

/// A local variable slot. `offset` is the byte distance below the frame
/// base; it is fixed once at declaration and shared by every reference.
#[derive(PartialEq, Eq, Debug)]
pub struct Var {
    pub name: String,
    pub offset: usize,
}

#[derive(PartialEq, Eq, Debug)]
pub enum Node {
    Num(i64),
    Bin(BinOp, Box<Node>, Box<Node>),
    Assign(Box<Node>, Box<Node>),
    Var(Rc<Var>),
    Addr(Box<Node>),
    Deref(Box<Node>),
    Return(Box<Node>),
    If {
        cond: Box<Node>,
        then: Box<Node>,
        els: Option<Box<Node>>,
    },
    While {
        cond: Box<Node>,
        body: Box<Node>,
    },
    For {
        init: Option<Box<Node>>,
        cond: Option<Box<Node>>,
        inc: Option<Box<Node>>,
        body: Box<Node>,
    },
    Block(Vec<Node>),
    Call(String, Vec<Node>),
}

#[derive(PartialEq, Eq, Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Rc<Var>>,
    /// every variable of the function, params included, in declaration order
    pub locals: Vec<Rc<Var>>,
    pub body: Vec<Node>,
}

pub type Program = Vec<Function>;

/// Per-function variable table. A variable is declared by its first use:
/// a lookup miss registers the name at the next free 8-byte slot.
#[derive(Default)]
pub struct Locals {
    vars: Vec<Rc<Var>>,
}

impl Locals {
    pub fn declare_or_lookup(&mut self, name: &str) -> Rc<Var> {
        if let Some(var) = self.vars.iter().find(|v| v.name == name) {
            return Rc::clone(var);
        }

        let var = Rc::new(Var {
            name: name.to_owned(),
            offset: (self.vars.len() + 1) * 8,
        });
        self.vars.push(Rc::clone(&var));
        var
    }
}

pub fn parse(tokens: &Tokens) -> Result<Program, Error> {
    let mut context = Context::new(tokens);
    let mut program = Vec::new();

    while !context.at_eof() {
        program.push(function(&mut context)?);
    }

    Ok(program)
}

fn new_node_bin(op: BinOp, lhs: Node, rhs: Node) -> Node {
    Node::Bin(op, Box::new(lhs), Box::new(rhs))
}

fn function(context: &mut Context) -> Result<Function, Error> {
    context.locals = Locals::default();

    let name = context.expect_ident()?;
    context.expect_sym('(')?;

    // params are registered first, so they own the lowest offsets
    let mut params = Vec::new();
    if !context.consume_sym(')') {
        loop {
            let pname = context.expect_ident()?;
            params.push(context.locals.declare_or_lookup(&pname));
            if !context.consume_sym(',') {
                break;
            }
        }
        context.expect_sym(')')?;
    }

    context.expect_sym('{')?;
    let mut body = Vec::new();
    while !context.consume_sym('}') {
        if context.at_eof() {
            return Err(
                ParseError("expected '}', but got EOF".to_owned(), context.src_pos()).into(),
            );
        }
        body.push(stmt(context)?);
    }

    let locals = mem::take(&mut context.locals);
    Ok(Function {
        name,
        params,
        locals: locals.vars,
        body,
    })
}

fn stmt(context: &mut Context) -> Result<Node, Error> {
    if context.consume_keyword(&Token::Return) {
        let node = Node::Return(Box::new(expr(context)?));
        context.expect_sym(';')?;
        return Ok(node);
    }

    if context.consume_keyword(&Token::If) {
        context.expect_sym('(')?;
        let cond = expr(context)?;
        context.expect_sym(')')?;
        let then = stmt(context)?;
        let els = if context.consume_keyword(&Token::Else) {
            Some(Box::new(stmt(context)?))
        } else {
            None
        };
        return Ok(Node::If {
            cond: Box::new(cond),
            then: Box::new(then),
            els,
        });
    }

    if context.consume_keyword(&Token::While) {
        context.expect_sym('(')?;
        let cond = expr(context)?;
        context.expect_sym(')')?;
        let body = stmt(context)?;
        return Ok(Node::While {
            cond: Box::new(cond),
            body: Box::new(body),
        });
    }

    if context.consume_keyword(&Token::For) {
        context.expect_sym('(')?;
        let init = if context.consume_sym(';') {
            None
        } else {
            let node = expr(context)?;
            context.expect_sym(';')?;
            Some(Box::new(node))
        };
        let cond = if context.consume_sym(';') {
            None
        } else {
            let node = expr(context)?;
            context.expect_sym(';')?;
            Some(Box::new(node))
        };
        let inc = if context.consume_sym(')') {
            None
        } else {
            let node = expr(context)?;
            context.expect_sym(')')?;
            Some(Box::new(node))
        };
        let body = stmt(context)?;
        return Ok(Node::For {
            init,
            cond,
            inc,
            body: Box::new(body),
        });
    }

    if context.consume_sym('{') {
        let mut stmts = Vec::new();
        while !context.consume_sym('}') {
            if context.at_eof() {
                return Err(
                    ParseError("expected '}', but got EOF".to_owned(), context.src_pos()).into(),
                );
            }
            stmts.push(stmt(context)?);
        }
        return Ok(Node::Block(stmts));
    }

    let node = expr(context)?;
    context.expect_sym(';')?;
    Ok(node)
}

fn expr(context: &mut Context) -> Result<Node, Error> {
    assign(context)
}

fn assign(context: &mut Context) -> Result<Node, Error> {
    let node = equality(context)?;
    if context.consume_sym('=') {
        // right-associative: a = b = 3 assigns 3 to both
        return Ok(Node::Assign(Box::new(node), Box::new(assign(context)?)));
    }
    Ok(node)
}

fn equality(context: &mut Context) -> Result<Node, Error> {
    let mut node = relational(context)?;

    loop {
        if context.consume_op(OpType::Eq) {
            node = new_node_bin(BinOp::Eq, node, relational(context)?);
        } else if context.consume_op(OpType::Ne) {
            node = new_node_bin(BinOp::Ne, node, relational(context)?);
        } else {
            return Ok(node);
        }
    }
}

fn relational(context: &mut Context) -> Result<Node, Error> {
    let mut node = add(context)?;

    loop {
        if context.consume_sym('<') {
            node = new_node_bin(BinOp::Lt, node, add(context)?);
        } else if context.consume_op(OpType::Le) {
            node = new_node_bin(BinOp::Le, node, add(context)?);
        } else if context.consume_sym('>') {
            // a > b is b < a
            node = new_node_bin(BinOp::Lt, add(context)?, node);
        } else if context.consume_op(OpType::Ge) {
            node = new_node_bin(BinOp::Le, add(context)?, node);
        } else {
            return Ok(node);
        }
    }
}

fn add(context: &mut Context) -> Result<Node, Error> {
    let mut node = mul(context)?;

    loop {
        if context.consume_sym('+') {
            node = new_node_bin(BinOp::Add, node, mul(context)?);
        } else if context.consume_sym('-') {
            node = new_node_bin(BinOp::Sub, node, mul(context)?);
        } else {
            return Ok(node);
        }
    }
}

fn mul(context: &mut Context) -> Result<Node, Error> {
    let mut node = unary(context)?;

    loop {
        if context.consume_sym('*') {
            node = new_node_bin(BinOp::Mul, node, unary(context)?);
        } else if context.consume_sym('/') {
            node = new_node_bin(BinOp::Div, node, unary(context)?);
        } else {
            return Ok(node);
        }
    }
}

fn unary(context: &mut Context) -> Result<Node, Error> {
    if context.consume_sym('+') {
        return unary(context);
    }
    if context.consume_sym('-') {
        return Ok(new_node_bin(BinOp::Sub, Node::Num(0), unary(context)?));
    }
    if context.consume_sym('&') {
        return Ok(Node::Addr(Box::new(unary(context)?)));
    }
    if context.consume_sym('*') {
        return Ok(Node::Deref(Box::new(unary(context)?)));
    }
    primary(context)
}

fn primary(context: &mut Context) -> Result<Node, Error> {
    if context.consume_sym('(') {
        let node = expr(context)?;
        context.expect_sym(')')?;
        return Ok(node);
    }

    match context.front_token().cloned() {
        Some((Token::Num(n), _)) => {
            context.pop_token();
            Ok(Node::Num(n))
        }
        Some((Token::Ident(id), _)) => {
            context.pop_token();
            if context.consume_sym('(') {
                let args = arguments(context)?;
                context.expect_sym(')')?;
                return Ok(Node::Call(id, args));
            }
            Ok(Node::Var(context.locals.declare_or_lookup(&id)))
        }
        Some((token, pos)) => {
            Err(ParseError(format!("expected an expression, but got {:?}", token), pos).into())
        }
        None => Err(ParseError("expected an expression, but got EOF".to_owned(), 0).into()),
    }
}

fn arguments(context: &mut Context) -> Result<Vec<Node>, Error> {
    let mut nodes = Vec::new();

    if let Some((Token::SLSym(')'), _)) = context.front_token() {
        return Ok(nodes);
    }

    nodes.push(assign(context)?);
    while context.consume_sym(',') {
        nodes.push(assign(context)?);
    }

    Ok(nodes)
}

struct Context<'a> {
    tokens: &'a Tokens,
    pos: usize,
    locals: Locals,
}

impl<'a> Context<'a> {
    fn new(tokens: &'a Tokens) -> Self {
        Context {
            tokens,
            pos: 0,
            locals: Locals::default(),
        }
    }

    fn front_token(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.pos)
    }

    fn pop_token(&mut self) -> Option<&(Token, usize)> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn src_pos(&self) -> usize {
        self.front_token().map(|(_, pos)| *pos).unwrap_or(0)
    }

    fn at_eof(&self) -> bool {
        matches!(self.front_token(), Some((Token::Eof, _)))
    }

    fn consume_sym(&mut self, c: char) -> bool {
        match self.front_token() {
            Some((Token::SLSym(sym), _)) if *sym == c => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn consume_op(&mut self, op: OpType) -> bool {
        match self.front_token() {
            Some((Token::Op(front), _)) if *front == op => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn consume_keyword(&mut self, keyword: &Token) -> bool {
        match self.front_token() {
            Some((token, _)) if token == keyword => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_sym(&mut self, c: char) -> Result<(), Error> {
        match self.pop_token() {
            Some((Token::SLSym(sym), _)) if *sym == c => Ok(()),
            Some((token, pos)) => {
                Err(ParseError(format!("expected '{}', but got {:?}", c, token), *pos).into())
            }
            None => Err(ParseError(format!("expected '{}', but got EOF", c), 0).into()),
        }
    }

    fn expect_ident(&mut self) -> Result<String, Error> {
        match self.pop_token() {
            Some((Token::Ident(name), _)) => Ok(name.clone()),
            Some((token, pos)) => Err(ParseError(
                format!("expected an identifier, but got {:?}", token),
                *pos,
            )
            .into()),
            None => Err(ParseError("expected an identifier, but got EOF".to_owned(), 0).into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::BinOp::*;
    use super::*;
    use crate::token::tokenize;

    fn parse_body(src: &str) -> Vec<Node> {
        let tokens = tokenize(&format!("main() {{ {} }}", src)).unwrap();
        let mut program = parse(&tokens).unwrap();
        assert_eq!(program.len(), 1);
        program.remove(0).body
    }

    fn var(name: &str, offset: usize) -> Node {
        Node::Var(Rc::new(Var {
            name: name.to_owned(),
            offset,
        }))
    }

    fn assign_node(lhs: Node, rhs: Node) -> Node {
        Node::Assign(Box::new(lhs), Box::new(rhs))
    }

    fn return_node(operand: Node) -> Node {
        Node::Return(Box::new(operand))
    }

    #[test]
    fn precedence_test() {
        use super::Node::*;

        assert_eq!(
            parse_body("return 1 + 2 * 3;"),
            vec![return_node(new_node_bin(
                Add,
                Num(1),
                new_node_bin(Mul, Num(2), Num(3))
            ))]
        );

        assert_eq!(
            parse_body("return (3 + 5) / 2;"),
            vec![return_node(new_node_bin(
                Div,
                new_node_bin(Add, Num(3), Num(5)),
                Num(2)
            ))]
        );

        // equal precedence associates left to right
        assert_eq!(
            parse_body("return 10 - 4 - 3;"),
            vec![return_node(new_node_bin(
                Sub,
                new_node_bin(Sub, Num(10), Num(4)),
                Num(3)
            ))]
        );
    }

    #[test]
    fn unary_test() {
        use super::Node::*;

        // unary minus is 0 - operand
        assert_eq!(
            parse_body("return -5;"),
            vec![return_node(new_node_bin(Sub, Num(0), Num(5)))]
        );

        // unary plus is a no-op
        assert_eq!(parse_body("return +5;"), vec![return_node(Num(5))]);
    }

    #[test]
    fn relational_swaps_gt_test() {
        use super::Node::*;

        assert_eq!(
            parse_body("return 2 > 1;"),
            vec![return_node(new_node_bin(Lt, Num(1), Num(2)))]
        );

        assert_eq!(
            parse_body("return 2 >= 1;"),
            vec![return_node(new_node_bin(Le, Num(1), Num(2)))]
        );

        assert_eq!(
            parse_body("return 1 < 2;"),
            vec![return_node(new_node_bin(Lt, Num(1), Num(2)))]
        );

        assert_eq!(
            parse_body("return 1 == 1;"),
            vec![return_node(new_node_bin(Eq, Num(1), Num(1)))]
        );
    }

    #[test]
    fn assign_is_right_associative() {
        use super::Node::*;

        assert_eq!(
            parse_body("a = b = 3;"),
            vec![assign_node(var("a", 8), assign_node(var("b", 16), Num(3)))]
        );
    }

    #[test]
    fn same_ident_keeps_its_offset() {
        use super::Node::*;

        assert_eq!(
            parse_body("a = 1; b = 2; a;"),
            vec![
                assign_node(var("a", 8), Num(1)),
                assign_node(var("b", 16), Num(2)),
                var("a", 8),
            ]
        );
    }

    #[test]
    fn pointer_ops_test() {
        assert_eq!(
            parse_body("a = 1; return *(&a);"),
            vec![
                assign_node(var("a", 8), Node::Num(1)),
                return_node(Node::Deref(Box::new(Node::Addr(Box::new(var("a", 8)))))),
            ]
        );
    }

    #[test]
    fn call_test() {
        use super::Node::*;

        assert_eq!(
            parse_body("foo();"),
            vec![Call("foo".to_owned(), Vec::new())]
        );

        assert_eq!(
            parse_body("foo(1, 2, a);"),
            vec![Call("foo".to_owned(), vec![Num(1), Num(2), var("a", 8)])]
        );
    }

    #[test]
    fn control_test() {
        use super::Node::*;

        assert_eq!(
            parse_body("if (1) return 2; else return 3;"),
            vec![If {
                cond: Box::new(Num(1)),
                then: Box::new(return_node(Num(2))),
                els: Some(Box::new(return_node(Num(3)))),
            }]
        );

        assert_eq!(
            parse_body("while (a < 10) a = a + 1;"),
            vec![While {
                cond: Box::new(new_node_bin(Lt, var("a", 8), Num(10))),
                body: Box::new(assign_node(var("a", 8), new_node_bin(Add, var("a", 8), Num(1)))),
            }]
        );

        assert_eq!(
            parse_body("for (;;) return 1;"),
            vec![For {
                init: None,
                cond: None,
                inc: None,
                body: Box::new(return_node(Num(1))),
            }]
        );

        assert_eq!(
            parse_body("for (i = 0; i < 3; i = i + 1) { j = j + i; }"),
            vec![For {
                init: Some(Box::new(assign_node(var("i", 8), Num(0)))),
                cond: Some(Box::new(new_node_bin(Lt, var("i", 8), Num(3)))),
                inc: Some(Box::new(assign_node(
                    var("i", 8),
                    new_node_bin(Add, var("i", 8), Num(1))
                ))),
                body: Box::new(Block(vec![assign_node(
                    var("j", 16),
                    new_node_bin(Add, var("j", 16), var("i", 8))
                )])),
            }]
        );
    }

    #[test]
    fn function_with_params_test() {
        let tokens = tokenize("add(x, y) { return x + y; }").unwrap();
        let program = parse(&tokens).unwrap();

        assert_eq!(program.len(), 1);
        let func = &program[0];
        assert_eq!(func.name, "add");
        assert_eq!(func.params.len(), 2);
        assert_eq!((func.params[0].name.as_str(), func.params[0].offset), ("x", 8));
        assert_eq!((func.params[1].name.as_str(), func.params[1].offset), ("y", 16));
        // locals cover the params
        assert_eq!(func.locals.len(), 2);
        assert_eq!(
            func.body,
            vec![return_node(new_node_bin(Add, var("x", 8), var("y", 16)))]
        );
    }

    #[test]
    fn two_functions_have_separate_locals() {
        let tokens = tokenize("one() { a = 1; return a; } two() { b = 2; return b; }").unwrap();
        let program = parse(&tokens).unwrap();

        assert_eq!(program.len(), 2);
        assert_eq!(program[0].locals.len(), 1);
        assert_eq!(program[1].locals.len(), 1);
        // each function's first variable starts at the first slot
        assert_eq!(program[0].locals[0].offset, 8);
        assert_eq!(program[1].locals[0].offset, 8);
    }

    #[test]
    fn declare_or_lookup_test() {
        let mut locals = Locals::default();

        let a = locals.declare_or_lookup("a");
        let b = locals.declare_or_lookup("b");
        assert_eq!(a.offset, 8);
        assert_eq!(b.offset, 16);

        // re-lookup returns the same slot, not a new one
        let a2 = locals.declare_or_lookup("a");
        assert_eq!(a2.offset, 8);
        assert!(Rc::ptr_eq(&a, &a2));
        assert_eq!(locals.vars.len(), 2);
    }

    #[test]
    fn parse_error_test() {
        let tokens = tokenize("main() { return 1 }").unwrap();
        assert!(parse(&tokens).is_err());

        let tokens = tokenize("main() { if 1 return 2; }").unwrap();
        assert!(parse(&tokens).is_err());

        let tokens = tokenize("main() { return 1;").unwrap();
        assert!(parse(&tokens).is_err());
    }
}
