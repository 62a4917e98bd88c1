/*!
# GoS active-node simulator

Active MPLS nodes built on [`gos_core`] and a deterministic simulation of
a path of such nodes losing and recovering GoS packets.

*/

mod loss;
mod message;
mod node;
pub mod simulation;

// convenient re-export of `gos_core` core objects
pub use gos_core::{
    CacheCapacity, Data, GosLevel, Packet, PacketBuilder, PacketId, PacketIdGenerator, PortId,
    Synthetic,
};

pub use self::{
    loss::{LinkLoss, LinkLossError},
    message::{Frame, NodeAction, RetransmissionRequest, Signal},
    node::{ActiveNode, ActiveNodeBuilder},
    simulation::{SimReport, Simulation, SimulationBuilder},
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const FEC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);

    /// move the signals of `actions` between two adjacent nodes until
    /// they stop talking
    fn exchange(
        ingress: &mut ActiveNode<Synthetic>,
        egress: &mut ActiveNode<Synthetic>,
        actions: Vec<NodeAction<Synthetic>>,
    ) {
        let mut to_egress = actions;
        while !to_egress.is_empty() {
            let mut to_ingress = Vec::new();
            for action in to_egress {
                if let NodeAction::Signal {
                    signal: Signal::LabelRequest { fec, session },
                    ..
                } = action
                {
                    to_ingress.extend(egress.on_label_request(PortId::new(1), fec, session).unwrap());
                }
            }
            to_egress = Vec::new();
            for action in to_ingress {
                if let NodeAction::Signal {
                    signal: Signal::LabelMapping { session, label },
                    ..
                } = action
                {
                    to_egress.extend(ingress.on_label_mapping(PortId::new(2), session, label));
                }
            }
        }
    }

    #[test]
    fn ingress_to_egress() {
        let mut ingress: ActiveNode<Synthetic> = ActiveNodeBuilder::new()
            .set_address(Ipv4Addr::new(192, 168, 0, 1))
            .build()
            .unwrap();
        let mut egress: ActiveNode<Synthetic> = ActiveNodeBuilder::new()
            .set_address(Ipv4Addr::new(192, 168, 0, 2))
            .set_egress(true)
            .build()
            .unwrap();

        let actions = ingress.establish_session(FEC, false).unwrap();
        exchange(&mut ingress, &mut egress, actions);
        assert!(ingress.is_established(FEC));

        let generator = PacketIdGenerator::new();
        let packet = Packet::builder(&generator)
            .source(Ipv4Addr::new(10, 0, 1, 1))
            .destination(FEC)
            .level(GosLevel::LEVEL_2)
            .data(Synthetic(32))
            .build()
            .unwrap();
        let id = packet.id();

        let actions = ingress.on_gos_packet(
            Frame {
                label: None,
                packet,
            },
            PortId::new(1),
        );
        let [NodeAction::Forward { frame, .. }] = actions.as_slice() else {
            panic!("Expecting the packet to be forwarded, got {actions:?}")
        };

        let actions = egress.on_gos_packet(frame.clone(), PortId::new(1));
        let [NodeAction::Deliver(packet)] = actions.as_slice() else {
            panic!("Expecting the packet to be delivered, got {actions:?}")
        };
        assert_eq!(packet.id(), id);
    }
}
