use std::env;
use std::process;

use failure::Error;

mod gen;
mod parse;
mod token;

use crate::parse::ParseError;
use crate::token::TokenizeError;

fn compile(input: &str) -> Result<String, Error> {
    let tokens = token::tokenize(input)?;
    let program = parse::parse(&tokens)?;
    gen::generate(&program)
}

/// Echo the source with a caret under the offending column.
fn point_at(input: &str, pos: usize, msg: &str) {
    eprintln!("{}", input);
    eprintln!("{}^ {}", " ".repeat(pos), msg);
}

fn report(input: &str, err: &Error) {
    if let Some(TokenizeError(msg, pos)) = err.downcast_ref::<TokenizeError>() {
        point_at(input, *pos, msg);
    } else if let Some(ParseError(msg, pos)) = err.downcast_ref::<ParseError>() {
        point_at(input, *pos, msg);
    } else {
        eprintln!("{}", err);
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("usage: minicc <program>");
        process::exit(1);
    }

    match compile(&args[1]) {
        Ok(asm) => {
            println!(".intel_syntax noprefix");
            println!(".globl main");
            print!("{}", asm);
        }
        Err(err) => {
            report(&args[1], &err);
            process::exit(1);
        }
    }
}
