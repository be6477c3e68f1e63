//! Loop type-affinity pass (C7): `run(typed_ast, ctx)` records, per
//! analyzed loop, whether its operands should prefer typed registers.

use super::OptimizationContext;
use crate::{
    ast::{
        LoopKind,
        Node,
        NodeId,
        NodeKind,
        Type,
        TypedAst,
    },
    value::Value,
};

/// The resolved-type/constant-ness/typed-register-preference facts
/// recorded for one loop operand (start, end, step, or a while-guard side).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperandInfo {
    /// The operand's AST node.
    pub node: NodeId,
    /// Its resolved type, if known.
    pub resolved_type: Option<Type>,
    /// Whether it is effectively constant (literal, or flagged so).
    pub is_constant: bool,
    /// Whether its type supports a typed register.
    pub prefers_typed: bool,
    /// Whether it is numeric and not constant — residency is required
    /// under exactly this condition (§3).
    pub requires_residency: bool,
}

impl OperandInfo {
    fn from_node(ast: &TypedAst, node: NodeId) -> Self {
        let resolved = ast.get(node).resolved_type;
        let is_constant = ast.get(node).is_constant;
        let prefers_typed = resolved.is_some_and(Type::supports_typed_register);
        let requires_residency = resolved.is_some_and(Type::is_numeric) && !is_constant;
        OperandInfo {
            node,
            resolved_type: resolved,
            is_constant,
            prefers_typed,
            requires_residency,
        }
    }
}

/// The sign of a range loop's step, as proven (or not) by constant folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepSign {
    /// Step is a positive constant (including the implicit default `+1`).
    #[default]
    Positive,
    /// Step is a negative constant.
    Negative,
    /// Step is not a literal this pass can read the sign of.
    Unknown,
}

/// One recorded loop's affinity facts (§3 `LoopAffinityBinding`).
#[derive(Debug, Clone, PartialEq)]
pub struct LoopAffinityBinding {
    /// Which loop form this binding describes.
    pub loop_kind: LoopKind,
    /// Range loop's `start`, if this is a range loop.
    pub start: Option<OperandInfo>,
    /// Range loop's `end`, or while loop's guard right-hand side.
    pub end: Option<OperandInfo>,
    /// Range loop's `step`, if explicit.
    pub step: Option<OperandInfo>,
    /// While loop's guard left-hand side.
    pub guard_left: Option<OperandInfo>,
    /// Whether a range loop is proven to have numeric bounds.
    pub numeric_bounds_proven: bool,
    /// Whether a while guard's both sides are numeric.
    pub guard_is_numeric: bool,
    /// The range loop's step sign (or the default for non-range loops).
    pub step_sign: StepSign,
    /// Whether a range loop's `end` is inclusive.
    pub inclusive: bool,
    /// Nesting depth at which this loop was entered.
    pub loop_depth: u32,
}

impl LoopAffinityBinding {
    /// The overall `prefer_typed_register` flag written back to the loop
    /// node: true if any recorded operand prefers a typed register.
    pub fn overall_prefers_typed(&self) -> bool {
        [self.start, self.end, self.step, self.guard_left]
            .into_iter()
            .flatten()
            .any(|op| op.prefers_typed)
    }

    /// The overall `requires_loop_residency` flag: true if any recorded
    /// operand requires residency.
    pub fn overall_requires_residency(&self) -> bool {
        [self.start, self.end, self.step, self.guard_left]
            .into_iter()
            .flatten()
            .any(|op| op.requires_residency)
    }
}

fn literal_sign(ast: &TypedAst, node: NodeId) -> StepSign {
    match &ast.get(node).kind {
        NodeKind::Literal(Value::I32(n)) => sign_of(*n as i64),
        NodeKind::Literal(Value::I64(n)) => sign_of(*n),
        NodeKind::Literal(Value::F64(n)) => {
            if *n > 0.0 {
                StepSign::Positive
            } else if *n < 0.0 {
                StepSign::Negative
            } else {
                StepSign::Unknown
            }
        }
        NodeKind::Literal(Value::U32(_)) | NodeKind::Literal(Value::U64(_)) => StepSign::Positive,
        _ => StepSign::Unknown,
    }
}

fn sign_of(n: i64) -> StepSign {
    use std::cmp::Ordering;
    match n.cmp(&0) {
        Ordering::Greater => StepSign::Positive,
        Ordering::Less => StepSign::Negative,
        Ordering::Equal => StepSign::Unknown,
    }
}

/// C7: annotates loop nodes with typed-register affinity.
pub struct LoopAffinityPass;

impl LoopAffinityPass {
    /// Clear prior bindings from `ctx` and visit every loop in `ast`,
    /// writing `prefer_typed_register`/`requires_loop_residency`/
    /// `loop_binding_id` back onto each recorded loop node.
    pub fn run(ast: &mut TypedAst, ctx: &mut OptimizationContext) {
        ctx.clear_affinity();
        let Some(root) = ast.root() else { return };
        let mut depth = 0u32;
        Self::visit(ast, root, &mut depth, ctx);
    }

    fn visit(ast: &mut TypedAst, id: NodeId, depth: &mut u32, ctx: &mut OptimizationContext) {
        if let Some(binding) = Self::build_binding(ast, id, *depth) {
            ctx.loops_visited += 1;
            *depth += 1;
            for child in ast.get(id).child_ids() {
                Self::visit(ast, child, depth, ctx);
            }
            *depth -= 1;

            let prefer_typed = binding.overall_prefers_typed();
            let requires_residency = binding.overall_requires_residency();
            let binding_id = ctx.add_affinity_binding(binding);
            if let Some(annotation) = ast.get_mut(id).loop_annotation_mut() {
                annotation.prefer_typed_register = prefer_typed;
                annotation.requires_loop_residency = requires_residency;
                annotation.loop_binding_id = u32::try_from(binding_id).ok();
            }
        } else {
            for child in ast.get(id).child_ids() {
                Self::visit(ast, child, depth, ctx);
            }
        }
    }

    fn build_binding(ast: &TypedAst, id: NodeId, depth: u32) -> Option<LoopAffinityBinding> {
        match &ast.get(id).kind {
            NodeKind::ForRange {
                start,
                end,
                step,
                inclusive,
                ..
            } => Some(Self::build_range_binding(ast, *start, *end, *step, *inclusive, depth)),
            NodeKind::While { condition, .. } => Self::build_while_binding(ast, *condition, depth),
            // Iterator affinity is an explicit stub — see §4.5 and §9: operand
            // node pointers from earlier folding passes are not trusted here.
            NodeKind::ForIter { .. } => None,
            _ => None,
        }
    }

    fn build_range_binding(
        ast: &TypedAst,
        start: NodeId,
        end: NodeId,
        step: Option<NodeId>,
        inclusive: bool,
        depth: u32,
    ) -> LoopAffinityBinding {
        let start_info = OperandInfo::from_node(ast, start);
        let end_info = OperandInfo::from_node(ast, end);
        let step_info = step.map(|s| OperandInfo::from_node(ast, s));

        let candidate_type = start_info
            .resolved_type
            .or(end_info.resolved_type)
            .or(step_info.and_then(|s| s.resolved_type));
        let numeric_bounds_proven = start_info.resolved_type.is_some()
            && end_info.resolved_type.is_some()
            && candidate_type.is_some_and(Type::is_numeric);

        let step_sign = match step {
            Some(s) => literal_sign(ast, s),
            None => StepSign::Positive, // implicit default step is `+1`
        };

        LoopAffinityBinding {
            loop_kind: LoopKind::Range,
            start: Some(start_info),
            end: Some(end_info),
            step: step_info,
            guard_left: None,
            numeric_bounds_proven,
            guard_is_numeric: false,
            step_sign,
            inclusive,
            loop_depth: depth,
        }
    }

    fn build_while_binding(
        ast: &TypedAst,
        condition: NodeId,
        depth: u32,
    ) -> Option<LoopAffinityBinding> {
        let NodeKind::Binary { op, left, right } = &ast.get(condition).kind else {
            return None;
        };
        if !op.is_ordering_comparison() {
            return None;
        }
        let left_info = OperandInfo::from_node(ast, *left);
        let right_info = OperandInfo::from_node(ast, *right);
        let guard_is_numeric = left_info.resolved_type.is_some_and(Type::is_numeric)
            && right_info.resolved_type.is_some_and(Type::is_numeric);

        Some(LoopAffinityBinding {
            loop_kind: LoopKind::While,
            start: None,
            end: Some(right_info),
            step: None,
            guard_left: Some(left_info),
            numeric_bounds_proven: false,
            guard_is_numeric,
            step_sign: StepSign::Unknown,
            inclusive: false,
            loop_depth: depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BinaryOp,
        LoopAnnotation,
        NodeKind,
    };

    fn push_i32_literal(ast: &mut TypedAst, n: i32) -> NodeId {
        ast.push(Node::new(NodeKind::Literal(Value::I32(n))).with_type(Type::I32).constant())
    }

    #[test]
    fn tight_counted_loop_is_proven_numeric_with_positive_step() {
        let mut ast = TypedAst::new();
        let start = push_i32_literal(&mut ast, 0);
        let end = push_i32_literal(&mut ast, 1000);
        let body = ast.push(Node::new(NodeKind::Block(vec![])));
        let loop_node = ast.push(Node::new(NodeKind::ForRange {
            var: "i".into(),
            start,
            end,
            step: None,
            inclusive: false,
            body,
            annotation: LoopAnnotation::default(),
        }));
        ast.set_root(loop_node);

        let mut ctx = OptimizationContext::new();
        LoopAffinityPass::run(&mut ast, &mut ctx);

        let annotation = ast.get(loop_node).loop_annotation().unwrap();
        let binding_id = annotation.loop_binding_id.expect("binding recorded");
        let binding = ctx.affinity_binding(binding_id).unwrap();
        assert!(binding.numeric_bounds_proven);
        assert_eq!(binding.step_sign, StepSign::Positive);
        assert_eq!(binding.loop_depth, 0);
    }

    #[test]
    fn while_guard_must_be_an_ordering_comparison() {
        let mut ast = TypedAst::new();
        let left = ast.push(Node::new(NodeKind::Identifier("i".into())).with_type(Type::I32));
        let right = ast.push(Node::new(NodeKind::Identifier("n".into())).with_type(Type::I32));
        let eq_cond = ast.push(Node::new(NodeKind::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        }));
        let body = ast.push(Node::new(NodeKind::Block(vec![])));
        let while_node = ast.push(Node::new(NodeKind::While {
            condition: eq_cond,
            body,
            annotation: LoopAnnotation::default(),
        }));
        ast.set_root(while_node);

        let mut ctx = OptimizationContext::new();
        LoopAffinityPass::run(&mut ast, &mut ctx);

        assert!(ctx.affinity_bindings().is_empty());
        assert!(ast.get(while_node).loop_annotation().unwrap().loop_binding_id.is_none());
    }

    #[test]
    fn for_iterator_loops_record_nothing() {
        let mut ast = TypedAst::new();
        let iterable = ast.push(Node::new(NodeKind::Identifier("xs".into())));
        let body = ast.push(Node::new(NodeKind::Block(vec![])));
        let loop_node = ast.push(Node::new(NodeKind::ForIter {
            var: "x".into(),
            iterable,
            body,
            annotation: LoopAnnotation::default(),
        }));
        ast.set_root(loop_node);

        let mut ctx = OptimizationContext::new();
        LoopAffinityPass::run(&mut ast, &mut ctx);
        assert!(ctx.affinity_bindings().is_empty());
    }

    #[test]
    fn running_twice_yields_identical_bindings() {
        let mut ast = TypedAst::new();
        let start = push_i32_literal(&mut ast, 0);
        let end = push_i32_literal(&mut ast, 10);
        let body = ast.push(Node::new(NodeKind::Block(vec![])));
        let loop_node = ast.push(Node::new(NodeKind::ForRange {
            var: "i".into(),
            start,
            end,
            step: None,
            inclusive: false,
            body,
            annotation: LoopAnnotation::default(),
        }));
        ast.set_root(loop_node);

        let mut ctx = OptimizationContext::new();
        LoopAffinityPass::run(&mut ast, &mut ctx);
        let first = ctx.affinity_bindings().to_vec();
        LoopAffinityPass::run(&mut ast, &mut ctx);
        let second = ctx.affinity_bindings().to_vec();
        assert_eq!(first, second);
    }
}
