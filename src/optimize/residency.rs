//! Loop type-residency pass (C8): `run(typed_ast, ctx)` identifies, per
//! analyzed loop, which non-induction operand subtrees are loop-invariant
//! and may be hoisted into a typed register for the loop's duration.

use super::OptimizationContext;
use crate::ast::{
    NodeId,
    NodeKind,
    Type,
    TypedAst,
};

/// One qualifying operand of a residency plan: the subtree plus whether it
/// prefers a typed register and whether it requires residency (i.e. is not
/// already a compile-time constant).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidencyOperand {
    /// The operand's AST node.
    pub node: NodeId,
    /// Its resolved type.
    pub resolved_type: Type,
    /// Always true for a recorded operand — qualification already checked
    /// `Type::supports_typed_register` (§4.6 condition 1).
    pub prefers_typed: bool,
    /// True unless the operand is itself a compile-time constant.
    pub requires_residency: bool,
}

/// One loop's residency findings (§3 `LoopResidencyPlan`): the non-induction
/// operand subtrees that qualify for typed-register residency.
///
/// A range loop's candidates are `end` and `step`; a while loop's are the
/// comparison's `left` and `right` (§4.6). Only slots that qualify are
/// `Some`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopResidencyPlan {
    /// The loop node this plan was computed for — plans are looked up by
    /// loop reference, not by an id propagated onto the node (§4.6).
    pub loop_node: Option<NodeId>,
    /// Range loop's `end`, or while loop's guard `right`.
    pub end: Option<ResidencyOperand>,
    /// Range loop's `step`, or while loop's guard `left`.
    pub step: Option<ResidencyOperand>,
}

impl LoopResidencyPlan {
    /// Whether this plan has at least one qualifying operand.
    pub fn has_invariant_operands(&self) -> bool {
        self.end.is_some() || self.step.is_some()
    }
}

/// C8: computes, for each supported loop, which operand subtrees may
/// reside in typed registers for the loop's lifetime.
pub struct LoopResidencyPass;

impl LoopResidencyPass {
    /// Clear prior plans from `ctx` and visit every loop in `ast`,
    /// appending a plan for each loop with at least one qualifying operand.
    pub fn run(ast: &TypedAst, ctx: &mut OptimizationContext) {
        ctx.clear_residency();
        let Some(root) = ast.root() else { return };
        for id in ast.walk(root) {
            Self::visit_loop(ast, id, ctx);
        }
    }

    fn visit_loop(ast: &TypedAst, id: NodeId, ctx: &mut OptimizationContext) {
        let plan = match &ast.get(id).kind {
            NodeKind::ForRange { end, step, body, .. } => LoopResidencyPlan {
                loop_node: Some(id),
                end: Self::qualify(ast, *end, *body),
                step: step.and_then(|s| Self::qualify(ast, s, *body)),
            },
            NodeKind::While { condition, body, .. } => {
                let NodeKind::Binary { op, left, right } = &ast.get(*condition).kind else {
                    return;
                };
                if !op.is_ordering_comparison() {
                    return;
                }
                LoopResidencyPlan {
                    loop_node: Some(id),
                    // Mirror the affinity pass's naming: `end` is the
                    // guard's right-hand side, `step` the left-hand side.
                    end: Self::qualify(ast, *right, *body),
                    step: Self::qualify(ast, *left, *body),
                }
            }
            _ => return,
        };

        if plan.has_invariant_operands() {
            ctx.residency_entries_emitted += 1;
            ctx.add_residency_plan(plan);
        }
    }

    /// Whether `operand` qualifies for residency given `body` (§4.6):
    /// 1. its resolved type supports a typed register;
    /// 2. every identifier it references has a known resolved type;
    /// 3. none of those identifiers is mutated within `body` in a way that
    ///    changes its value or type.
    fn qualify(ast: &TypedAst, operand: NodeId, body: NodeId) -> Option<ResidencyOperand> {
        let node = ast.get(operand);
        let resolved_type = node.resolved_type?;
        if !resolved_type.supports_typed_register() {
            return None;
        }

        let mut identifiers: Vec<(String, Type)> = Vec::new();
        for id in ast.walk(operand) {
            if let NodeKind::Identifier(name) = &ast.get(id).kind {
                let ty = ast.get(id).resolved_type?;
                identifiers.push((name.clone(), ty));
            }
        }

        if Self::body_mutates(ast, body, &identifiers) {
            return None;
        }

        Some(ResidencyOperand {
            node: operand,
            resolved_type,
            prefers_typed: true,
            requires_residency: !node.is_constant,
        })
    }

    /// Walk `body` looking for assignment targets, declarations,
    /// for-range/for-iterator induction variables, and member/array
    /// assignments whose base references one of `identifiers` (§4.6). Any
    /// mutation of a candidate identifier disqualifies it — the conservative
    /// reading of §4.6/§8 scenario 3: a mutation's right-hand side being
    /// type-compatible keeps the *typed representation* sound, but the
    /// value is no longer loop-invariant, so residency is still lost.
    fn body_mutates(ast: &TypedAst, body: NodeId, identifiers: &[(String, Type)]) -> bool {
        let lookup = |name: &str| identifiers.iter().find(|(n, _)| n == name).map(|(_, t)| *t);

        for id in ast.walk(body) {
            match &ast.get(id).kind {
                NodeKind::Assign { name, .. } => {
                    if lookup(name).is_some() {
                        return true;
                    }
                }
                NodeKind::VarDecl { name, .. } => {
                    if lookup(name).is_some() {
                        return true;
                    }
                }
                NodeKind::ForRange { var, .. } | NodeKind::ForIter { var, .. } => {
                    if lookup(var).is_some() {
                        return true;
                    }
                }
                NodeKind::MemberAssign { object, .. } => {
                    if let NodeKind::Identifier(base) = &ast.get(*object).kind {
                        if lookup(base).is_some() {
                            return true;
                        }
                    }
                }
                NodeKind::ArrayAssign { array, .. } => {
                    if let NodeKind::Identifier(base) = &ast.get(*array).kind {
                        if lookup(base).is_some() {
                            return true;
                        }
                    }
                }
                _ => {}
            }
        }
        false
    }
}
