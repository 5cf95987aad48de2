//! Second pass: edge building, degree accounting, and the topological
//! evaluation order.

use std::mem;

use crate::{
    spirv::{self, Opcode, OperandBuf},
    Error, Result,
};

use super::{EdgeKind, ListNode, Shader, NIL};

impl Shader {
    /// Builds the forward adjacency lists. Runs over the complete
    /// instruction sequence so forward references to labels and phi
    /// operands resolve; an id with no producer anywhere is
    /// [`Error::UndefinedId`].
    pub(super) fn build_graph(&mut self) -> Result<()> {
        let words = mem::take(&mut self.words);
        let mut buf = OperandBuf::new();
        let result = self.build_graph_inner(&words, &mut buf);
        self.words = words;
        result
    }

    fn build_graph_inner(&mut self, words: &[u32], buf: &mut OperandBuf) -> Result<()> {
        for index in 0..self.instructions.len() as u32 {
            let offset = self.offset(index);
            let (raw, word_count) = spirv::unpack(words[offset]);
            let Some(op) = Opcode::from_u16(raw) else {
                continue;
            };
            if op.is_metadata() {
                continue;
            }
            let inst = &words[offset..offset + word_count as usize];

            if op.has_result_type() {
                let producer = self.producer_or_err(inst[1])?;
                self.add_edge(producer, index, EdgeKind::Data);
            }

            buf.clear();
            spirv::collect_id_operands(op, inst, buf);
            for position in 0..buf.len() {
                let producer = self.producer_or_err(buf[position])?;
                self.add_edge(producer, index, EdgeKind::Data);
            }

            buf.clear();
            spirv::collect_label_operands(op, inst, buf);
            for position in 0..buf.len() {
                let label = self.label_instruction(words, buf[position])?;
                self.add_edge(index, label, EdgeKind::Control);
            }

            // Phi parent labels flow label → phi, so deleting a
            // predecessor block reaches its phis.
            if op == Opcode::Phi {
                let mut pair = 4;
                while pair < word_count as usize {
                    let label = self.label_instruction(words, inst[pair])?;
                    self.add_edge(label, index, EdgeKind::Control);
                    pair += 2;
                }
            }
        }
        Ok(())
    }

    /// Resolves a label operand to its `OpLabel` instruction.
    fn label_instruction(&self, words: &[u32], id: u32) -> Result<u32> {
        let instruction = self.producer_or_err(id)?;
        let (raw, _) = spirv::unpack(words[self.offset(instruction)]);
        if raw != Opcode::Label as u16 {
            return Err(Error::MalformedBlock(raw));
        }
        Ok(instruction)
    }

    fn add_edge(&mut self, from: u32, to: u32, kind: EdgeKind) {
        let head = self.instructions[from as usize].edges;
        self.pool.push(ListNode {
            target: to,
            kind,
            next: head,
        });
        self.instructions[from as usize].edges = (self.pool.len() - 1) as u32;
    }

    /// Fills both degree vectors with one traversal of the pool.
    pub(super) fn compute_degrees(&mut self) {
        let count = self.instructions.len();
        self.in_degree = vec![0; count];
        self.out_degree = vec![0; count];
        for index in 0..count {
            let mut edge = self.instructions[index].edges;
            while edge != NIL {
                let node = self.pool[edge as usize];
                self.out_degree[index] += 1;
                self.in_degree[node.target as usize] += 1;
                edge = node.next;
            }
        }
    }

    /// Kahn's algorithm with an explicit work-stack, then a stable sort by
    /// `(level, decode index)`.
    ///
    /// The level sort exists because SPIR-V permits forward data flow that
    /// decode order alone would evaluate too early. Instructions caught in
    /// graph cycles (loops) are never popped and keep whatever level
    /// their acyclic predecessors gave them; the decode-index tiebreak then
    /// preserves definition-before-use for them, which SPIR-V's dominance
    /// layout rule guarantees for everything except phi operands.
    pub(super) fn compute_order(&mut self) {
        let count = self.instructions.len();
        let mut remaining = self.in_degree.clone();
        let mut level = vec![0u32; count];
        let mut stack: Vec<u32> = (0..count as u32)
            .filter(|&index| remaining[index as usize] == 0)
            .collect();

        while let Some(index) = stack.pop() {
            let mut edge = self.instructions[index as usize].edges;
            while edge != NIL {
                let node = self.pool[edge as usize];
                let target = node.target as usize;
                level[target] = level[target].max(level[index as usize] + 1);
                remaining[target] -= 1;
                if remaining[target] == 0 {
                    stack.push(node.target);
                }
                edge = node.next;
            }
        }

        let mut order: Vec<u32> = (0..count as u32).collect();
        order.sort_by_key(|&index| (level[index as usize], index));
        self.order = order;
    }
}
