//! A minimal text renderer for the structured tree.
//!
//! The real printer (instruction disassembly, variable names, colouring) is
//! an external collaborator per the core's scope; this renders just enough
//! — addresses, condition ids, and the tree shape — to eyeball a result from
//! the CLI or a test failure message. It does not attempt to be the
//! decompiler's final output format.

use std::fmt::Write as _;

use crate::ast::{AstNode, Branch};

const INDENT: &str = "    ";

/// Renders `branch` as indented pseudo-code text.
pub fn render(branch: &Branch) -> String {
    let mut out = String::new();
    render_branch(branch, 0, &mut out);
    out
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn render_branch(branch: &Branch, depth: usize, out: &mut String) {
    for node in &branch.children {
        render_node(node, depth, out);
    }
}

fn render_node(node: &AstNode, depth: usize, out: &mut String) {
    push_indent(out, depth);
    match node {
        AstNode::Block(addrs) => {
            let rendered: Vec<String> = addrs.iter().map(|a| format!("0x{a:08X}")).collect();
            let _ = writeln!(out, "block {}", rendered.join(", "));
        }
        AstNode::Ifelse {
            cond,
            then_branch,
            else_branch,
        } => {
            let _ = writeln!(out, "if (cond 0x{:X} @ 0x{:08X}) {{", cond.cond, cond.address);
            render_branch(then_branch, depth + 1, out);
            if else_branch.is_empty() {
                push_indent(out, depth);
                out.push_str("}\n");
            } else {
                push_indent(out, depth);
                out.push_str("} else {\n");
                render_branch(else_branch, depth + 1, out);
                push_indent(out, depth);
                out.push_str("}\n");
            }
        }
        AstNode::IfGoto { cond, target } => {
            let _ = writeln!(
                out,
                "if (cond 0x{:X} @ 0x{:08X}) goto 0x{:08X};",
                cond.cond, cond.address, target
            );
        }
        AstNode::AndIf { cond } => {
            let _ = writeln!(
                out,
                "and-if (cond 0x{:X} @ 0x{:08X});",
                cond.cond, cond.address
            );
        }
        AstNode::Loop(lp) => {
            let kw = if lp.infinite { "loop" } else { "while" };
            let _ = writeln!(out, "{kw} {{");
            render_branch(&lp.header, depth + 1, out);
            render_branch(&lp.body, depth + 1, out);
            push_indent(out, depth);
            out.push_str("}\n");
            if let Some(epilog) = &lp.epilog {
                render_branch(epilog, depth, out);
            }
        }
        AstNode::Jmp(target) => {
            let _ = writeln!(out, "goto 0x{target:08X};");
        }
        AstNode::Comment(text) => {
            let _ = writeln!(out, "// {text}");
        }
    }
}
